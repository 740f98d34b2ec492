//! Durable approval ledger.

mod json_store;

pub use json_store::JsonApprovalStore;
