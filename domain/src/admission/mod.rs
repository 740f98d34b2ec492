//! Admission domain: digests, risk verdicts, approvals and unit states.
//!
//! A source unit is admitted when its exact bytes either scan clean or carry
//! an approval record keyed by their [`ContentDigest`](digest::ContentDigest).
//! Paths and modification times are never trusted.

pub mod approval;
pub mod digest;
pub mod source;
pub mod state;
pub mod verdict;
