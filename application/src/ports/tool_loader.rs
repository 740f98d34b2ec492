//! Tool loader port
//!
//! Binds an admitted source unit to a [`Callable`]. Called only after the
//! unit's digest is approved; the loader works from the unit's in-memory bytes.

use super::callable::Callable;
use std::sync::Arc;
use toolgate_domain::{CapabilityDescriptor, SourceUnit};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("source does not compile: {0}")]
    Compile(String),
    #[error("no usable descriptor")]
    MissingDescriptor,
    #[error("loader failed: {0}")]
    Other(String),
}

pub trait ToolLoaderPort: Send + Sync {
    fn load(
        &self,
        unit: &SourceUnit,
        descriptor: &CapabilityDescriptor,
    ) -> Result<Arc<dyn Callable>, LoadError>;
}
