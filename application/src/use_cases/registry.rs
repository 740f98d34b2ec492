//! Tool registry: the live set of loaded tools.
//!
//! Each entry is an immutable `(descriptor, callable, digest)` snapshot behind
//! an `Arc`. Readers clone the `Arc` and release the lock before invoking, so
//! a call never holds the registry and a reload can never tear an entry.

use crate::ports::callable::Callable;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use toolgate_domain::{ApprovalKind, CapabilityDescriptor, ContentDigest};
use tracing::debug;

/// A loaded tool. Replaced wholesale on reload, never mutated.
pub struct RegistryEntry {
    pub descriptor: CapabilityDescriptor,
    pub digest: ContentDigest,
    pub callable: Arc<dyn Callable>,
    pub admitted_at: DateTime<Utc>,
    pub approval: ApprovalKind,
}

impl RegistryEntry {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.descriptor.name)
            .field("digest", &self.digest)
            .field("admitted_at", &self.admitted_at)
            .field("approval", &self.approval)
            .finish()
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub loaded: usize,
    pub auto_approved: usize,
    pub manually_approved: usize,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry currently bound to `name`.
    pub fn get(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind an entry, returning the one it replaced.
    pub fn insert(&self, entry: RegistryEntry) -> Option<Arc<RegistryEntry>> {
        let name = entry.descriptor.name.clone();
        debug!(tool = %name, digest = %entry.digest.short(), "Registered tool");
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name, Arc::new(entry))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(name);
        if removed.is_some() {
            debug!(tool = %name, "Unregistered tool");
        }
        removed
    }

    /// Descriptors of every loaded tool, sorted by name.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut descriptors: Vec<_> = entries.values().map(|e| e.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let auto_approved = entries
            .values()
            .filter(|e| e.approval == ApprovalKind::Automatic)
            .count();
        RegistryStats {
            loaded: entries.len(),
            auto_approved,
            manually_approved: entries.len() - auto_approved,
        }
    }
}
