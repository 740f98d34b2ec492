//! Local tools directory.
//!
//! A unit is a regular file `<key>.lua` directly inside the directory.
//! Sub-directories, dot-files and other extensions are not units.

use std::io;
use std::path::{Path, PathBuf};
use toolgate_application::SourceDirectoryPort;
use toolgate_domain::SourceUnit;

pub const TOOL_EXTENSION: &str = "lua";

#[derive(Debug, Clone)]
pub struct LocalSourceDirectory {
    dir: PathBuf,
}

impl LocalSourceDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, TOOL_EXTENSION))
    }
}

/// Unit key for `path`, if it names a candidate unit by its shape.
///
/// Only the file name is inspected; the caller decides which directory counts.
pub fn unit_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let stem = name.strip_suffix(TOOL_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && !key.starts_with('.') && !key.contains(['/', '\\'])
}

impl SourceDirectoryPort for LocalSourceDirectory {
    fn list_keys(&self) -> io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(key) = unit_key(&path) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> io::Result<Option<SourceUnit>> {
        if !is_plain_key(key) {
            return Ok(None);
        }
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(content) => Ok(Some(SourceUnit::new(key, path, content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if path.is_dir() => {
                tracing::debug!(path = %path.display(), "Ignoring directory named like a tool: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_key() {
        assert_eq!(unit_key(Path::new("/t/greet.lua")), Some("greet".into()));
        assert_eq!(unit_key(Path::new("/t/.hidden.lua")), None);
        assert_eq!(unit_key(Path::new("/t/notes.txt")), None);
        assert_eq!(unit_key(Path::new("/t/.lua")), None);
        assert_eq!(unit_key(Path::new("/t/greetlua")), None);
    }

    #[test]
    fn test_list_keys_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.lua"), "return {}").unwrap();
        std::fs::write(dir.path().join("alpha.lua"), "return {}").unwrap();
        std::fs::write(dir.path().join("readme.md"), "docs").unwrap();
        std::fs::write(dir.path().join(".swap.lua"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested.lua")).unwrap();

        let source = LocalSourceDirectory::new(dir.path());
        assert_eq!(source.list_keys().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSourceDirectory::new(dir.path().join("absent"));
        assert!(source.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_read_returns_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greet.lua"), b"return { name = 'greet' }").unwrap();

        let source = LocalSourceDirectory::new(dir.path());
        let unit = source.read("greet").unwrap().unwrap();
        assert_eq!(unit.key(), "greet");
        assert_eq!(unit.content().as_ref(), b"return { name = 'greet' }");
        assert_eq!(unit.path(), dir.path().join("greet.lua"));
    }

    #[test]
    fn test_read_missing_or_escaping_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSourceDirectory::new(dir.path());
        assert!(source.read("gone").unwrap().is_none());
        assert!(source.read("../outside").unwrap().is_none());
        assert!(source.read(".hidden").unwrap().is_none());
    }
}
