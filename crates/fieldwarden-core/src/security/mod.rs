//! Field-level access control for user records.
//!
//! This module provides:
//! - Role resolution from authenticated principals
//! - A static, validated field policy registry
//! - Per-field visibility, editability, and masking decisions
//! - A hash-chained audit trail with pluggable append-only sinks
//!
//! # Security Model
//!
//! Decisions fail closed. A principal without a recognised role is treated
//! as the deny-all role, and a field missing from the registry is hidden.
//! Hidden fields are omitted from rendered output rather than nulled.
//!
//! Auditing runs after the decision and is reported separately; an
//! unavailable sink never turns a granted view into a denied one.
//!
//! # Example
//!
//! ```ignore
//! use fieldwarden_core::security::{
//!     AccessGateway, AuditRecorder, FieldPolicyRegistry, MemoryAuditSink, PolicyEngine,
//!     Principal, SourceAddress, Subject,
//! };
//! use std::sync::Arc;
//!
//! let registry = Arc::new(FieldPolicyRegistry::user_accounts());
//! let recorder = AuditRecorder::new(Arc::new(MemoryAuditSink::new()));
//! let gateway = AccessGateway::new(PolicyEngine::new(registry), Arc::new(recorder));
//!
//! let staff = Principal::new("7", "support@example.com", Some("staff"));
//! let user = Subject::new("42", "jo@example.com").with_field("phone_number", "(555) 123-4567");
//! let view = gateway.view_detail(&staff, &user, &SourceAddress::new("203.0.113.7"));
//! ```

pub mod audit;
pub mod audit_store;
pub mod capability;
pub mod context;
pub mod engine;
pub mod error;
pub mod field_security;
pub mod registry;
pub mod view;

// Error types
pub use error::{AuditError, AuditResult, SecurityError, SecurityResult};

// Roles and request context
pub use capability::{Role, RoleResolver};
pub use context::{Principal, SourceAddress, Subject};

// Policy and masking
pub use field_security::{
    FieldMasker, FieldPolicy, MaskedValue, MaskingStrategy, DATE_FALLBACK, PHONE_FALLBACK,
};
pub use registry::{FieldPolicyRegistry, RegistryBuilder, RegistryDocument};

// Decisions
pub use engine::{AccessDecision, PolicyEngine};
pub use view::{
    render_decisions, AccessGateway, DetailView, EditAuthorization, EditRejection, ListRow,
    ListView, EMPTY_CELL, LIST_COLUMNS,
};

// Audit
pub use audit::{
    verify_chain, AuditAction, AuditEntry, AuditRecorder, AuditSink, MemoryAuditSink,
    NullAuditSink, RecordHandle, SealedEntry, TracingAuditSink, UnavailableAuditSink,
    GENESIS_HASH,
};
pub use audit_store::{FileAuditSink, SledAuditSink};
