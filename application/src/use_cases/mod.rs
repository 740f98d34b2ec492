//! Use cases
//!
//! Application-level operations that orchestrate domain logic.

pub mod admission;
pub mod execution;
pub mod gateway;
pub mod registry;
pub(crate) mod shared;

#[cfg(test)]
pub(crate) mod test_support;
