//! Lua tool loader and the callable it produces.
//!
//! `load` only compiles the admitted bytes to check them. Every `invoke`
//! builds a fresh VM from those same in-memory bytes on a blocking thread:
//! tool state never leaks between calls, and the file on disk is never
//! re-read after admission.
//!
//! An instruction-count hook polls the call's cancellation token, so a tool
//! stuck in a loop stops at its next check once the wrapper gives up on it.

use super::host_api::{HostSignal, register_host_api};
use super::sandbox::apply_sandbox;
use async_trait::async_trait;
use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use toolgate_application::{Callable, InvocationError, LoadError, ToolLoaderPort};
use toolgate_domain::{CapabilityDescriptor, SourceUnit, TypedArguments, TypedValue};
use tracing::debug;

/// Instructions between cancellation checks.
pub const DEFAULT_HOOK_INTERVAL: u32 = 1_000;

/// Nesting limit when converting a returned table to JSON.
const MAX_RESULT_DEPTH: usize = 32;

pub struct LuaToolLoader {
    hook_interval: u32,
}

impl Default for LuaToolLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaToolLoader {
    pub fn new() -> Self {
        Self {
            hook_interval: DEFAULT_HOOK_INTERVAL,
        }
    }

    pub fn with_hook_interval(mut self, instructions: u32) -> Self {
        self.hook_interval = instructions.max(1);
        self
    }
}

impl ToolLoaderPort for LuaToolLoader {
    fn load(
        &self,
        unit: &SourceUnit,
        descriptor: &CapabilityDescriptor,
    ) -> Result<Arc<dyn Callable>, LoadError> {
        let lua = Lua::new();
        lua.load(unit.content().as_ref())
            .set_name(chunk_name(&descriptor.name))
            .into_function()
            .map_err(|e| LoadError::Compile(e.to_string()))?;

        debug!(tool = %descriptor.name, digest = %unit.digest().short(), "Compiled tool unit");
        Ok(Arc::new(LuaTool {
            name: Arc::from(descriptor.name.as_str()),
            source: Arc::clone(unit.content()),
            hook_interval: self.hook_interval,
        }))
    }
}

/// `=name` makes Lua report `name:line` instead of a file path.
fn chunk_name(tool: &str) -> String {
    format!("={}", tool)
}

#[derive(Clone)]
struct LuaTool {
    name: Arc<str>,
    source: Arc<[u8]>,
    hook_interval: u32,
}

#[async_trait]
impl Callable for LuaTool {
    async fn invoke(
        &self,
        args: &TypedArguments,
        cancel: CancellationToken,
    ) -> Result<String, InvocationError> {
        let tool = self.clone();
        let args = args.clone();
        tokio::task::spawn_blocking(move || tool.run(&args, &cancel))
            .await
            .map_err(|e| InvocationError::Internal(format!("tool thread failed: {}", e)))?
    }
}

impl LuaTool {
    fn run(&self, args: &TypedArguments, cancel: &CancellationToken) -> Result<String, InvocationError> {
        let lua = Lua::new();
        apply_sandbox(&lua).map_err(|e| InvocationError::Internal(format!("sandbox setup failed: {}", e)))?;
        register_host_api(&lua, &self.name)
            .map_err(|e| InvocationError::Internal(format!("host api setup failed: {}", e)))?;

        let token = cancel.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(self.hook_interval),
            move |_, _| {
                if token.is_cancelled() {
                    Err(LuaError::external(HostSignal::Interrupted))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        let outcome = (|| -> LuaResult<String> {
            let module: LuaTable = lua
                .load(self.source.as_ref())
                .set_name(chunk_name(&self.name))
                .eval()?;
            let entry: LuaFunction = module.get("run")?;
            let value: LuaValue = entry.call(arguments_table(&lua, args)?)?;
            render_output(value)
        })();

        if cancel.is_cancelled() {
            return Err(InvocationError::Cancelled);
        }
        outcome.map_err(|e| match HostSignal::find(&e) {
            Some(HostSignal::Transient(message)) => InvocationError::Transient(message),
            Some(HostSignal::Interrupted) => InvocationError::Cancelled,
            None => InvocationError::Internal(e.to_string()),
        })
    }
}

fn arguments_table(lua: &Lua, args: &TypedArguments) -> LuaResult<LuaTable> {
    let table = lua.create_table()?;
    for (name, value) in args.iter() {
        match value {
            TypedValue::String(s) => table.set(name.as_str(), s.as_str())?,
            TypedValue::Integer(i) => table.set(name.as_str(), *i)?,
            TypedValue::Number(n) => table.set(name.as_str(), *n)?,
            TypedValue::Boolean(b) => table.set(name.as_str(), *b)?,
        }
    }
    Ok(table)
}

/// Text form of `run`'s return value; tables become JSON.
fn render_output(value: LuaValue) -> LuaResult<String> {
    Ok(match value {
        LuaValue::Nil => String::new(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Table(_) => {
            serde_json::to_string(&lua_to_json(&value, 0)?).map_err(LuaError::external)?
        }
        other => {
            return Err(LuaError::external(format!(
                "run returned unsupported type: {}",
                other.type_name()
            )));
        }
    })
}

fn lua_to_json(value: &LuaValue, depth: usize) -> LuaResult<Value> {
    if depth > MAX_RESULT_DEPTH {
        return Err(LuaError::external("returned table is nested too deeply"));
    }
    Ok(match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::from(*i),
        LuaValue::Number(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        LuaValue::String(s) => Value::String(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => {
            let pairs = table
                .clone()
                .pairs::<LuaValue, LuaValue>()
                .collect::<LuaResult<Vec<_>>>()?;
            let len = table.raw_len();
            if len > 0 && pairs.len() == len {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: LuaValue = table.raw_get(i)?;
                    items.push(lua_to_json(&item, depth + 1)?);
                }
                Value::Array(items)
            } else {
                let mut map = Map::new();
                for (key, item) in pairs {
                    let key = match key {
                        LuaValue::String(s) => s.to_string_lossy().to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        LuaValue::Number(n) => n.to_string(),
                        LuaValue::Boolean(b) => b.to_string(),
                        other => format!("<{}>", other.type_name()),
                    };
                    map.insert(key, lua_to_json(&item, depth + 1)?);
                }
                Value::Object(map)
            }
        }
        other => Value::String(format!("<{}>", other.type_name())),
    })
}
