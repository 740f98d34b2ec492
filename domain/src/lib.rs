//! Domain layer for toolgate
//!
//! This crate contains the core types of the tool admission gateway.
//! It has no dependencies on infrastructure or runtime concerns.
//!
//! # Core Concepts
//!
//! ## Capability descriptors
//!
//! Every tool declares a name, a description and a typed input contract.
//! Arguments supplied by a caller are filtered against that contract on every
//! call, never trusted as-is.
//!
//! ## Admission
//!
//! A tool's source bytes are hashed into a [`ContentDigest`] and scanned into a
//! [`RiskVerdict`]. Clean verdicts are approved automatically; anything flagged
//! waits for an [`ApprovalRecord`] issued for that exact digest.

pub mod admission;
pub mod tool;

pub use admission::{
    approval::{AUTO_APPROVER, ApprovalError, ApprovalKind, ApprovalRecord},
    digest::{ContentDigest, DigestParseError},
    source::SourceUnit,
    state::{AdmissionIssue, AdmissionState, PendingTool, UnitStatus},
    verdict::{Finding, PassKind, RiskFlag, RiskVerdict},
};
pub use tool::{
    entities::{
        CapabilityDescriptor, MAX_TOOL_NAME_LEN, NameError, ParamSpec, ParamType,
        RESERVED_TOOL_NAMES, validate_tool_name,
    },
    traits::{InputError, InputFilter, StrictInputFilter},
    value_objects::{ExecutionResult, FailureKind, TypedArguments, TypedValue},
};
