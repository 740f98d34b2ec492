//! Lua runtime for admitted tool units, backed by mlua (Lua 5.4).
//!
//! # Modules
//!
//! - `sandbox` — C module blocking
//! - `host_api` — the `host` table (`host.transient`, `host.log`)
//! - `lua_tool` — `LuaToolLoader` (implements `ToolLoaderPort`) and the
//!   per-call VM behind each loaded tool

mod host_api;
mod lua_tool;
mod sandbox;

pub use host_api::HostSignal;
pub use lua_tool::{DEFAULT_HOOK_INTERVAL, LuaToolLoader};
