//! Durable audit sinks.
//!
//! Both sinks are append-only: neither exposes an update or delete path.

use super::audit::{AuditSink, SealedEntry};
use super::error::{AuditError, AuditResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const AUDIT_TREE_NAME: &[u8] = b"audit:entries";

/// JSON-lines audit file.
///
/// Each entry is written as one line while holding the sink lock, then
/// flushed, so concurrent appends never interleave. A write that fails part
/// way is truncated back to the previous end of file.
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Open (or create) an audit file for appending.
    pub fn open(path: impl Into<PathBuf>) -> AuditResult<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Read every entry from an audit file.
    pub fn read_all(path: impl AsRef<Path>) -> AuditResult<Vec<SealedEntry>> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Path of the audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, sealed: &SealedEntry) -> AuditResult<()> {
        let mut line = serde_json::to_vec(sealed)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        append_line(&mut *file, &line)?;
        Ok(())
    }

    fn tail(&self) -> AuditResult<Option<SealedEntry>> {
        let _guard = self.file.lock();
        Ok(Self::read_all(&self.path)?.pop())
    }

    fn flush(&self) -> AuditResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

/// A file-like target that can be cut back to an earlier length.
trait Truncate: Write {
    fn end(&self) -> std::io::Result<u64>;
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl Truncate for File {
    fn end(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole line or nothing.
fn append_line<T: Truncate>(target: &mut T, line: &[u8]) -> std::io::Result<()> {
    let start = target.end()?;
    if let Err(e) = target.write_all(line).and_then(|()| target.flush()) {
        if let Err(rollback) = target.truncate(start) {
            tracing::error!(
                error = %rollback,
                offset = start,
                "failed to remove partial audit line"
            );
        }
        return Err(e);
    }
    Ok(())
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// Audit entries stored in a sled tree keyed by big-endian sequence number.
pub struct SledAuditSink {
    tree: sled::Tree,
}

impl SledAuditSink {
    /// Open the audit tree in the given database.
    pub fn open(db: &sled::Db) -> AuditResult<Self> {
        let tree = db.open_tree(AUDIT_TREE_NAME)?;
        Ok(Self { tree })
    }

    /// All entries in sequence order.
    pub fn entries(&self) -> AuditResult<Vec<SealedEntry>> {
        let mut entries = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl AuditSink for SledAuditSink {
    fn append(&self, sealed: &SealedEntry) -> AuditResult<()> {
        let key = sealed.sequence.to_be_bytes();
        let value = serde_json::to_vec(sealed)?;

        // Refuse to overwrite an existing sequence number.
        self.tree
            .compare_and_swap(key, None::<&[u8]>, Some(value))?
            .map_err(|_| {
                AuditError::SinkUnavailable(format!(
                    "sequence {} already recorded",
                    sealed.sequence
                ))
            })?;
        Ok(())
    }

    fn tail(&self) -> AuditResult<Option<SealedEntry>> {
        match self.tree.last()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn flush(&self) -> AuditResult<()> {
        self.tree.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledAuditSink")
            .field("entries", &self.tree.len())
            .finish()
    }
}
