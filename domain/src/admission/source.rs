//! Source units: the exact bytes a tool was scanned from.

use super::digest::ContentDigest;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A tool candidate read once from disk.
///
/// Scanning, approval and loading all work from `content`, so the bytes that
/// were checked are the bytes that run.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    key: String,
    path: PathBuf,
    content: Arc<[u8]>,
    digest: ContentDigest,
}

impl SourceUnit {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        let digest = ContentDigest::of(&content);
        Self {
            key: key.into(),
            path: path.into(),
            content: content.into(),
            digest,
        }
    }

    /// Unit key: the file stem, which a tool's declared name must equal.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &Arc<[u8]> {
        &self.content
    }

    pub fn digest(&self) -> ContentDigest {
        self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_content() {
        let unit = SourceUnit::new("echo", "/tools/echo.lua", b"return {}".to_vec());
        assert_eq!(unit.digest(), ContentDigest::of(b"return {}"));
        assert_eq!(unit.key(), "echo");
        assert_eq!(&**unit.content(), b"return {}");
    }
}
