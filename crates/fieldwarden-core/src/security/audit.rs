//! Audit trail for record access.
//!
//! Every detail view, list view, or accepted edit produces exactly one
//! [`AuditEntry`]. The [`AuditRecorder`] seals entries into a blake3 hash
//! chain and hands them to an append-only [`AuditSink`]. Recording happens
//! after the access decision is made and never changes it.

use super::context::{Principal, SourceAddress};
use super::error::{AuditError, AuditResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hash preceding the first entry of a chain.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Kind of access being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A single record was opened.
    ViewDetail,
    /// A list of records was displayed.
    ViewList,
    /// Changes to a record were authorised.
    EditField,
}

impl AuditAction {
    /// Human label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::ViewDetail => "User detail",
            AuditAction::ViewList => "User list",
            AuditAction::EditField => "User edit",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            AuditAction::ViewDetail | AuditAction::ViewList => "viewed",
            AuditAction::EditField => "edited",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::ViewDetail => write!(f, "view_detail"),
            AuditAction::ViewList => write!(f, "view_list"),
            AuditAction::EditField => write!(f, "edit_field"),
        }
    }
}

/// An immutable record of one access event.
///
/// Field order is part of the persisted format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Identifier of the acting principal.
    pub actor_id: String,
    /// Display label of the acting principal.
    pub actor_label: String,
    /// Identifier of the record accessed.
    pub subject_id: String,
    /// Display label of the record accessed.
    pub subject_label: String,
    /// What kind of access happened.
    pub action: AuditAction,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Where the request came from.
    pub source_address: String,
}

impl AuditEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        action: AuditAction,
        actor: &Principal,
        subject_id: impl Into<String>,
        subject_label: impl Into<String>,
        source: &SourceAddress,
    ) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_label: actor.label.clone(),
            subject_id: subject_id.into(),
            subject_label: subject_label.into(),
            action,
            timestamp: Utc::now(),
            source_address: source.to_string(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Format the entry as a log line.
    pub fn to_log_line(&self) -> String {
        format!(
            "{} accessed: {} {} {} (ID: {}) | IP: {}",
            self.action.label(),
            self.actor_label,
            self.action.verb(),
            self.subject_label,
            self.subject_id,
            self.source_address
        )
    }
}

/// An entry bound into the hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEntry {
    /// Position in the chain, starting at zero.
    pub sequence: u64,
    /// Hex hash of the previous entry.
    pub prev_hash: String,
    /// Hex hash of this entry.
    pub hash: String,
    /// The recorded entry.
    pub entry: AuditEntry,
}

impl SealedEntry {
    fn seal(sequence: u64, prev: &[u8; 32], entry: AuditEntry) -> AuditResult<(Self, [u8; 32])> {
        let hash = chain_hash(prev, &entry)?;
        let sealed = Self {
            sequence,
            prev_hash: hex::encode(prev),
            hash: hex::encode(hash),
            entry,
        };
        Ok((sealed, hash))
    }
}

/// Hash of an entry given the previous link.
fn chain_hash(prev: &[u8; 32], entry: &AuditEntry) -> AuditResult<[u8; 32]> {
    let body = serde_json::to_vec(entry)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(&body);
    Ok(*hasher.finalize().as_bytes())
}

fn decode_hash(sequence: u64, hex_hash: &str) -> AuditResult<[u8; 32]> {
    let bytes = hex::decode(hex_hash).map_err(|e| AuditError::ChainBroken {
        sequence,
        reason: format!("malformed hash: {}", e),
    })?;
    bytes.try_into().map_err(|_| AuditError::ChainBroken {
        sequence,
        reason: "hash is not 32 bytes".to_string(),
    })
}

/// Verify a chain read back from a sink.
///
/// Detects edited entries, reordering, gaps, and a missing head.
pub fn verify_chain(entries: &[SealedEntry]) -> AuditResult<()> {
    let mut prev = GENESIS_HASH;
    for (expected, sealed) in (0u64..).zip(entries) {
        if sealed.sequence != expected {
            return Err(AuditError::ChainBroken {
                sequence: sealed.sequence,
                reason: format!("expected sequence {}", expected),
            });
        }
        if decode_hash(sealed.sequence, &sealed.prev_hash)? != prev {
            return Err(AuditError::ChainBroken {
                sequence: sealed.sequence,
                reason: "previous hash mismatch".to_string(),
            });
        }
        let actual = chain_hash(&prev, &sealed.entry)?;
        if decode_hash(sealed.sequence, &sealed.hash)? != actual {
            return Err(AuditError::ChainBroken {
                sequence: sealed.sequence,
                reason: "entry hash mismatch".to_string(),
            });
        }
        prev = actual;
    }
    Ok(())
}

/// Receipt for a recorded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    /// Chain position of the entry.
    pub sequence: u64,
    /// Hex hash of the entry.
    pub hash: String,
}

/// Append-only destination for sealed audit entries.
///
/// Implementations must make each append atomic: a reader never observes a
/// partially written entry.
pub trait AuditSink: Send + Sync {
    /// Append one entry.
    fn append(&self, sealed: &SealedEntry) -> AuditResult<()>;

    /// The most recent entry, if the sink persists them.
    fn tail(&self) -> AuditResult<Option<SealedEntry>> {
        Ok(None)
    }

    /// Flush any buffered entries.
    fn flush(&self) -> AuditResult<()> {
        Ok(())
    }
}

/// In-memory sink for testing.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<SealedEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in append order.
    pub fn entries(&self) -> Vec<SealedEntry> {
        self.entries.lock().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, sealed: &SealedEntry) -> AuditResult<()> {
        self.entries.lock().push(sealed.clone());
        Ok(())
    }

    fn tail(&self) -> AuditResult<Option<SealedEntry>> {
        Ok(self.entries.lock().last().cloned())
    }
}

/// Sink that discards all entries.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _sealed: &SealedEntry) -> AuditResult<()> {
        Ok(())
    }
}

/// Sink that emits each entry as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, sealed: &SealedEntry) -> AuditResult<()> {
        tracing::info!(
            target: "fieldwarden::audit",
            sequence = sealed.sequence,
            hash = %sealed.hash,
            action = %sealed.entry.action,
            actor_id = %sealed.entry.actor_id,
            subject_id = %sealed.entry.subject_id,
            "{}",
            sealed.entry.to_log_line()
        );
        Ok(())
    }
}

/// Sink standing in for one that could not be opened. Every append fails.
#[derive(Debug, Clone)]
pub struct UnavailableAuditSink {
    reason: String,
}

impl UnavailableAuditSink {
    /// Create a sink that reports `reason` on every append.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AuditSink for UnavailableAuditSink {
    fn append(&self, _sealed: &SealedEntry) -> AuditResult<()> {
        Err(AuditError::SinkUnavailable(self.reason.clone()))
    }
}

struct ChainState {
    next_sequence: u64,
    last_hash: [u8; 32],
    /// Why the chain cannot be extended, if it cannot.
    fault: Option<String>,
}

impl ChainState {
    fn genesis() -> Self {
        Self {
            next_sequence: 0,
            last_hash: GENESIS_HASH,
            fault: None,
        }
    }

    fn resume(sink: &dyn AuditSink) -> AuditResult<Self> {
        let last = match sink.tail()? {
            Some(last) => last,
            None => return Ok(Self::genesis()),
        };
        let next_sequence = last
            .sequence
            .checked_add(1)
            .ok_or_else(|| AuditError::ChainBroken {
                sequence: last.sequence,
                reason: "sequence space exhausted".to_string(),
            })?;
        Ok(Self {
            next_sequence,
            last_hash: decode_hash(last.sequence, &last.hash)?,
            fault: None,
        })
    }
}

/// Seals entries into a hash chain and appends them to a sink.
///
/// Appends are serialized so the chain stays linear; entries from
/// concurrent callers land in arrival order. A failed append leaves the
/// chain where it was.
///
/// If the sink's last entry cannot be read back, the recorder is created
/// faulted: every `record` fails with an error instead of forking the
/// chain, and access decisions carry on regardless.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    chain: Mutex<ChainState>,
    failures: AtomicU64,
}

impl AuditRecorder {
    /// Create a recorder, continuing from the sink's last entry if any.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        let chain = ChainState::resume(sink.as_ref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "audit trail could not be resumed, recording disabled");
            ChainState {
                fault: Some(e.to_string()),
                ..ChainState::genesis()
            }
        });
        Self {
            sink,
            chain: Mutex::new(chain),
            failures: AtomicU64::new(0),
        }
    }

    /// Record an entry.
    ///
    /// Failures are logged at warn level, counted, and returned; the caller
    /// decides what to do with them but must not revoke access because of one.
    pub fn record(&self, entry: AuditEntry) -> AuditResult<RecordHandle> {
        let mut chain = self.chain.lock();
        let result = match &chain.fault {
            Some(fault) => Err(AuditError::SinkUnavailable(format!(
                "audit trail cannot be extended: {}",
                fault
            ))),
            None => SealedEntry::seal(chain.next_sequence, &chain.last_hash, entry)
                .and_then(|(sealed, hash)| self.sink.append(&sealed).map(|()| (sealed, hash))),
        };

        match result {
            Ok((sealed, hash)) => {
                match chain.next_sequence.checked_add(1) {
                    Some(next) => chain.next_sequence = next,
                    None => chain.fault = Some("sequence space exhausted".to_string()),
                }
                chain.last_hash = hash;
                Ok(RecordHandle {
                    sequence: sealed.sequence,
                    hash: sealed.hash,
                })
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, sequence = chain.next_sequence, "audit write failed");
                Err(e)
            }
        }
    }

    /// Flush the sink.
    pub fn flush(&self) -> AuditResult<()> {
        self.sink.flush()
    }

    /// Number of entries recorded by this recorder's chain so far.
    pub fn next_sequence(&self) -> u64 {
        self.chain.lock().next_sequence
    }

    /// Whether recording is disabled because the trail could not be resumed.
    pub fn is_faulted(&self) -> bool {
        self.chain.lock().fault.is_some()
    }

    /// Number of failed writes since creation.
    pub fn failed_writes(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("next_sequence", &self.next_sequence())
            .field("failed_writes", &self.failed_writes())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(subject: &str) -> AuditEntry {
        let actor = Principal::new("7", "staff@example.com", Some("staff"));
        AuditEntry::new(
            AuditAction::ViewDetail,
            &actor,
            subject,
            format!("{}@example.com", subject),
            &SourceAddress::new("203.0.113.7"),
        )
        .at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_log_line() {
        let line = entry("u-1").to_log_line();
        assert_eq!(
            line,
            "User detail accessed: staff@example.com viewed u-1@example.com (ID: u-1) | IP: 203.0.113.7"
        );
    }

    #[test]
    fn test_entry_field_order() {
        let json = serde_json::to_string(&entry("u-1")).unwrap();
        let keys = [
            "actor_id",
            "actor_label",
            "subject_id",
            "subject_label",
            "action",
            "timestamp",
            "source_address",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(json.contains("\"view_detail\""));
    }

    #[test]
    fn test_recorder_chains_entries() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(sink.clone());

        let first = recorder.record(entry("u-1")).unwrap();
        let second = recorder.record(entry("u-2")).unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_ne!(first.hash, second.hash);

        let entries = sink.entries();
        assert_eq!(entries[0].prev_hash, hex::encode(GENESIS_HASH));
        assert_eq!(entries[1].prev_hash, first.hash);
        verify_chain(&entries).unwrap();
    }

    #[test]
    fn test_verify_detects_tampering() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(sink.clone());
        for i in 0..3 {
            recorder.record(entry(&format!("u-{}", i))).unwrap();
        }

        let mut edited = sink.entries();
        edited[1].entry.source_address = "198.51.100.1".to_string();
        assert!(matches!(
            verify_chain(&edited),
            Err(AuditError::ChainBroken { sequence: 1, .. })
        ));

        let mut dropped = sink.entries();
        dropped.remove(1);
        assert!(matches!(
            verify_chain(&dropped),
            Err(AuditError::ChainBroken { sequence: 2, .. })
        ));

        let mut swapped = sink.entries();
        swapped.swap(0, 1);
        assert!(verify_chain(&swapped).is_err());
    }

    #[test]
    fn test_failed_write_does_not_advance_chain() {
        let recorder = AuditRecorder::new(Arc::new(UnavailableAuditSink::new("connection refused")));
        let result = recorder.record(entry("u-1"));

        assert!(matches!(result, Err(AuditError::SinkUnavailable(_))));
        assert_eq!(recorder.failed_writes(), 1);
        assert_eq!(recorder.next_sequence(), 0);
    }

    #[test]
    fn test_recorder_resumes_from_tail() {
        let sink = Arc::new(MemoryAuditSink::new());
        {
            let recorder = AuditRecorder::new(sink.clone());
            recorder.record(entry("u-1")).unwrap();
            recorder.record(entry("u-2")).unwrap();
        }

        let recorder = AuditRecorder::new(sink.clone());
        assert_eq!(recorder.next_sequence(), 2);
        recorder.record(entry("u-3")).unwrap();
        verify_chain(&sink.entries()).unwrap();
    }

    #[test]
    fn test_null_and_tracing_sinks() {
        for sink in [
            Arc::new(NullAuditSink) as Arc<dyn AuditSink>,
            Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
        ] {
            let recorder = AuditRecorder::new(sink);
            recorder.record(entry("u-1")).unwrap();
            recorder.flush().unwrap();
            assert_eq!(recorder.failed_writes(), 0);
        }
    }

    #[test]
    fn test_unreadable_tail_faults_recorder() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.append(&SealedEntry {
            sequence: 3,
            prev_hash: hex::encode(GENESIS_HASH),
            hash: "not hex".to_string(),
            entry: entry("u-1"),
        })
        .unwrap();

        let recorder = AuditRecorder::new(sink.clone());
        assert!(recorder.is_faulted());
        assert!(matches!(
            recorder.record(entry("u-2")),
            Err(AuditError::SinkUnavailable(_))
        ));
        assert_eq!(recorder.failed_writes(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_exhausted_tail_sequence_faults_recorder() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.append(&SealedEntry {
            sequence: u64::MAX,
            prev_hash: hex::encode(GENESIS_HASH),
            hash: hex::encode(GENESIS_HASH),
            entry: entry("u-1"),
        })
        .unwrap();

        let recorder = AuditRecorder::new(sink.clone());
        assert!(recorder.is_faulted());
        assert!(recorder.record(entry("u-2")).is_err());
        assert_eq!(sink.len(), 1);
    }
}
