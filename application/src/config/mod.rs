//! Application-level configuration.
//!
//! - [`ExecutionParams`] — per-call timeout, retry policy and output limit

pub mod execution_params;

pub use execution_params::{ExecutionParams, MIN_TOOL_TIMEOUT, RetryPolicy};
