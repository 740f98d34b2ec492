//! Tool domain: what a tool declares and what calling it produces.
//!
//! A tool is described by a [`CapabilityDescriptor`](entities::CapabilityDescriptor)
//! extracted from its source unit before any of its code runs. At call time the
//! caller's raw JSON arguments pass through an [`InputFilter`](traits::InputFilter)
//! that turns them into [`TypedArguments`](value_objects::TypedArguments), and
//! every invocation ends in exactly one
//! [`ExecutionResult`](value_objects::ExecutionResult).
//!
//! ```text
//! raw JSON args ──▶ InputFilter ──▶ TypedArguments ──▶ tool entry point
//!                        │                                   │
//!                        ▼                                   ▼
//!                  InputError ─────────────▶ ExecutionResult::{Success, Failure}
//! ```
//!
//! # Failure kinds
//!
//! | Kind | Retried? | Caller-visible message |
//! |------|----------|------------------------|
//! | `UnknownTool` | No | `unknown tool` |
//! | `InputRejected` | No | names the offending parameter |
//! | `Timeout` | No | `tool execution timed out` |
//! | `ToolInternalError` | No | `tool execution failed` |
//! | `TransientFailure` | Yes, with backoff | `tool temporarily unavailable` |

pub mod entities;
pub mod traits;
pub mod value_objects;
