//! Fieldwarden Core - field-level access control, masking, and audit.
//!
//! This crate decides, for every viewer of a user record, which fields are
//! visible, which are editable, and what is rendered when raw access is
//! denied. Every view is recorded in a verifiable audit trail.

pub mod security;
pub mod value;

pub use value::Value;

// Security exports
pub use security::{
    AccessDecision, AccessGateway, AuditAction, AuditEntry, AuditError, AuditRecorder, AuditSink,
    DetailView, EditAuthorization, EditRejection, FieldMasker, FieldPolicy, FieldPolicyRegistry,
    FileAuditSink, ListView, MaskedValue, MaskingStrategy, MemoryAuditSink, NullAuditSink,
    PolicyEngine, Principal, RecordHandle, Role, RoleResolver, SealedEntry, SecurityError,
    SledAuditSink, SourceAddress, Subject, TracingAuditSink, UnavailableAuditSink,
};
