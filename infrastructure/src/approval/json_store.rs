//! JSON approval ledger.
//!
//! ```json
//! { "version": 1,
//!   "approvals": { "<sha256 hex>": { "approved_at": "...", "decided_by": "alice", "kind": "manual" } } }
//! ```
//!
//! Every write serializes the whole table to a temp file in the ledger's
//! directory, fsyncs it and renames it over the ledger, so a reader sees either
//! the old table or the new one. A ledger that cannot be read is moved aside
//! to `<name>.corrupt` and the store starts empty.
//!
//! Writers take an exclusive `flock` on `<name>.lock` for the whole
//! read-merge-write, so two processes recording approvals at once (`serve`
//! and `toolgate approve`) both end up in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use toolgate_application::ApprovalStorePort;
use toolgate_domain::{ApprovalError, ApprovalKind, ApprovalRecord, ContentDigest};
use tracing::{debug, info, warn};

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    approvals: BTreeMap<String, LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    approved_at: DateTime<Utc>,
    decided_by: String,
    kind: ApprovalKind,
}

#[derive(Debug, thiserror::Error)]
enum LedgerReadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported ledger version {0}")]
    Version(u32),
    #[error("invalid digest key {0:?}")]
    Key(String),
}

/// File-backed [`ApprovalStorePort`].
pub struct JsonApprovalStore {
    path: PathBuf,
    records: Mutex<HashMap<ContentDigest, ApprovalRecord>>,
}

impl JsonApprovalStore {
    /// Open the ledger at `path`. Never fails: a missing ledger is empty and a
    /// corrupt one is quarantined.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_ledger(&path) {
            Ok(records) => {
                debug!(path = %path.display(), approvals = records.len(), "Loaded approval ledger");
                records
            }
            Err(LedgerReadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                HashMap::new()
            }
            Err(e) => {
                let aside = quarantine_path(&path);
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Approval ledger is unreadable, moving it to {} and starting empty",
                    aside.display()
                );
                if let Err(e) = std::fs::rename(&path, &aside) {
                    warn!("Could not quarantine approval ledger: {}", e);
                }
                HashMap::new()
            }
        };

        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge approvals another process wrote since this store was opened.
    ///
    /// Returns how many records were new. Records already held are kept
    /// as they are; an unreadable ledger is left alone while running.
    pub fn reload(&self) -> usize {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        self.merge_from_disk(&mut records)
    }

    fn merge_from_disk(&self, records: &mut HashMap<ContentDigest, ApprovalRecord>) -> usize {
        let on_disk = match read_ledger(&self.path) {
            Ok(on_disk) => on_disk,
            Err(LedgerReadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Skipping unreadable approval ledger");
                return 0;
            }
        };
        let before = records.len();
        for (digest, record) in on_disk {
            records.entry(digest).or_insert(record);
        }
        records.len() - before
    }

    fn lock(&self) -> Result<LedgerLock, ApprovalError> {
        LedgerLock::acquire(&self.path).map_err(|e| ApprovalError::Persist(e.to_string()))
    }

    fn persist(&self, records: &HashMap<ContentDigest, ApprovalRecord>) -> Result<(), ApprovalError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            approvals: records
                .values()
                .map(|r| {
                    (
                        r.digest.to_hex(),
                        LedgerEntry {
                            approved_at: r.approved_at,
                            decided_by: r.decided_by.clone(),
                            kind: r.kind,
                        },
                    )
                })
                .collect(),
        };
        write_atomic(&self.path, &file).map_err(|e| ApprovalError::Persist(e.to_string()))
    }
}

impl ApprovalStorePort for JsonApprovalStore {
    fn lookup(&self, digest: &ContentDigest) -> Option<ApprovalRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(digest).cloned()
    }

    fn record_approval(
        &self,
        digest: ContentDigest,
        decided_by: &str,
        kind: ApprovalKind,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = self.lock()?;
        self.merge_from_disk(&mut records);
        if let Some(existing) = records.get(&digest) {
            return Ok(existing.clone());
        }

        let record = match kind {
            ApprovalKind::Automatic => ApprovalRecord::automatic(digest),
            ApprovalKind::Manual => ApprovalRecord::manual(digest, decided_by),
        };
        records.insert(digest, record.clone());
        if let Err(e) = self.persist(&records) {
            records.remove(&digest);
            return Err(e);
        }

        info!(digest = %digest.short(), decided_by = %record.decided_by, "Recorded approval");
        Ok(record)
    }

    fn records(&self) -> Vec<ApprovalRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|r| r.approved_at);
        all
    }

    fn flush(&self) -> Result<(), ApprovalError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.is_empty() && !self.path.exists() {
            return Ok(());
        }
        let _lock = self.lock()?;
        self.merge_from_disk(&mut records);
        self.persist(&records)
    }
}

fn read_ledger(path: &Path) -> Result<HashMap<ContentDigest, ApprovalRecord>, LedgerReadError> {
    let bytes = std::fs::read(path)?;
    let file: LedgerFile = serde_json::from_slice(&bytes)?;
    if file.version != LEDGER_VERSION {
        return Err(LedgerReadError::Version(file.version));
    }

    let mut records = HashMap::with_capacity(file.approvals.len());
    for (key, entry) in file.approvals {
        let digest: ContentDigest = key.parse().map_err(|_| LedgerReadError::Key(key.clone()))?;
        records.insert(
            digest,
            ApprovalRecord {
                digest,
                approved_at: entry.approved_at,
                decided_by: entry.decided_by,
                kind: entry.kind,
            },
        );
    }
    Ok(records)
}

fn write_atomic(path: &Path, file: &LedgerFile) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, file)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Exclusive advisory lock on the ledger's lock file, released on drop.
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    fn acquire(ledger: &Path) -> io::Result<Self> {
        let path = sibling(ledger, ".lock");
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        flock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

/// Block until this process holds an exclusive `flock` on `file`.
fn flock_exclusive(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        loop {
            // SAFETY: `file` owns a valid descriptor for the duration of the call.
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(())
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    sibling(path, ".corrupt")
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
