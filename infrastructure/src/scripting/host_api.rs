//! `host` table exposed to tool scripts.
//!
//! - `host.transient(message)`: give up this attempt with a back-pressure
//!   failure; the execution wrapper may retry it.
//! - `host.log(message)`: emit a tracing event tagged with the tool name.

use mlua::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Control-flow signals raised from host callbacks and the instruction hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostSignal {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("interrupted")]
    Interrupted,
}

impl HostSignal {
    /// Find a signal anywhere in the cause chain of `error`.
    pub fn find(error: &LuaError) -> Option<HostSignal> {
        match error {
            LuaError::ExternalError(inner) => inner.downcast_ref::<HostSignal>().cloned(),
            LuaError::CallbackError { cause, .. } => Self::find(cause),
            LuaError::WithContext { cause, .. } => Self::find(cause),
            _ => None,
        }
    }
}

pub fn register_host_api(lua: &Lua, tool_name: &str) -> LuaResult<()> {
    let host = lua.create_table()?;

    let transient = lua.create_function(|_, message: Option<String>| -> LuaResult<()> {
        Err(LuaError::external(HostSignal::Transient(
            message.unwrap_or_default(),
        )))
    })?;
    host.set("transient", transient)?;

    let name: Arc<str> = Arc::from(tool_name);
    let log = lua.create_function(move |_, message: String| {
        info!(tool = %name, "{}", message);
        Ok(())
    })?;
    host.set("log", log)?;

    lua.globals().set("host", host)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_signal_survives_the_call_boundary() {
        let lua = Lua::new();
        register_host_api(&lua, "sample").unwrap();

        let err = lua
            .load("host.transient('rate limited')")
            .exec()
            .unwrap_err();
        assert_eq!(
            HostSignal::find(&err),
            Some(HostSignal::Transient("rate limited".into()))
        );
    }

    #[test]
    fn test_plain_errors_carry_no_signal() {
        let lua = Lua::new();
        register_host_api(&lua, "sample").unwrap();

        let err = lua.load("error('boom')").exec().unwrap_err();
        assert_eq!(HostSignal::find(&err), None);
    }

    #[test]
    fn test_log_is_callable() {
        let lua = Lua::new();
        register_host_api(&lua, "sample").unwrap();
        lua.load("host.log('hello from a tool')").exec().unwrap();
    }
}
