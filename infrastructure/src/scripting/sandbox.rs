//! Lua sandbox for tool invocations: blocks native module loading.
//!
//! Tool code has passed admission (clean scan or operator approval), so the
//! standard library stays available. What is removed is the ability to load
//! C modules, which would bypass everything the scanner can see.

use mlua::prelude::*;

/// Apply sandbox restrictions to a fresh tool VM.
///
/// Blocks:
/// - `package.loadlib`: no arbitrary .so/.dll
/// - `package.cpath`: no C module search path
pub fn apply_sandbox(lua: &Lua) -> LuaResult<()> {
    lua.load(
        r#"
        package.loadlib = nil
        package.cpath = ''
    "#,
    )
    .set_name("=sandbox")
    .exec()
}
