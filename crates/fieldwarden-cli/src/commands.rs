//! Subcommand execution.

use crate::config::{AuditSinkKind, Command, EngineConfig, PrincipalArgs};
use crate::error::{Error, Result};
use fieldwarden_core::security::{
    verify_chain, AccessGateway, AuditRecorder, AuditResult, AuditSink, FieldPolicyRegistry,
    FileAuditSink, MemoryAuditSink, NullAuditSink, PolicyEngine, Principal, RecordHandle, Role,
    SealedEntry, SledAuditSink, SourceAddress, Subject, TracingAuditSink, UnavailableAuditSink,
};
use fieldwarden_core::Value;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Load the registry named by the configuration.
pub fn load_registry(config: &EngineConfig) -> Result<FieldPolicyRegistry> {
    match &config.policy_path {
        Some(path) => Ok(FieldPolicyRegistry::load(path)?),
        None => Ok(FieldPolicyRegistry::user_accounts()),
    }
}

/// Open the configured audit sink.
pub fn open_sink(config: &EngineConfig) -> Result<Arc<dyn AuditSink>> {
    let sink: Arc<dyn AuditSink> = match config.audit_sink {
        AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
        AuditSinkKind::File => Arc::new(FileAuditSink::open(&config.audit_path)?),
        AuditSinkKind::Sled => {
            let db = sled::open(&config.audit_path)?;
            Arc::new(SledAuditSink::open(&db)?)
        }
        AuditSinkKind::Memory => Arc::new(MemoryAuditSink::new()),
        AuditSinkKind::Null => Arc::new(NullAuditSink),
    };
    Ok(sink)
}

/// Build the gateway. The registry is frozen before any request is served.
///
/// An audit sink that cannot be opened does not stop the gateway; views are
/// still served and each reports the failed audit write.
pub fn build_gateway(config: &EngineConfig) -> Result<AccessGateway> {
    let registry = Arc::new(load_registry(config)?);
    let sink = open_sink(config).unwrap_or_else(|e| {
        tracing::warn!(
            error = %e,
            path = %config.audit_path.display(),
            "audit sink unavailable"
        );
        Arc::new(UnavailableAuditSink::new(e.to_string()))
    });
    let recorder = AuditRecorder::new(sink);
    if !config.has_durable_audit() {
        tracing::info!(sink = ?config.audit_sink, "audit trail will not outlive this process");
    }
    tracing::debug!(
        version = registry.version(),
        next_sequence = recorder.next_sequence(),
        sink = ?config.audit_sink,
        "gateway ready"
    );
    Ok(AccessGateway::new(PolicyEngine::new(registry), Arc::new(recorder)))
}

/// Execute a subcommand and return its JSON output.
pub fn execute(config: &EngineConfig, command: Command) -> Result<serde_json::Value> {
    match command {
        Command::Fieldset { role } => fieldset(config, &role),
        Command::Policy => Ok(serde_json::to_value(load_registry(config)?.to_document())?),
        Command::Verify => verify(config),
        Command::View {
            principal,
            subject,
            fields,
        } => {
            let gateway = build_gateway(config)?;
            let (actor, source) = principal_of(&principal);
            let subject = read_subject(&subject)?;
            let view = if fields.is_empty() {
                gateway.view_detail(&actor, &subject, &source)
            } else {
                gateway.view_fields(&actor, &subject, &fields, &source)
            };
            Ok(json!({
                "subject_id": subject.id,
                "fields": view.render(),
                "editable": view.editable_fields(),
                "audit": audit_json(&view.audit),
            }))
        }
        Command::List {
            principal,
            subjects,
        } => {
            let gateway = build_gateway(config)?;
            let (actor, source) = principal_of(&principal);
            let subjects = read_subjects(&subjects)?;
            let list = gateway.view_list(&actor, &subjects, &source);
            let rows: Vec<serde_json::Value> = list
                .rows
                .iter()
                .map(|row| {
                    let cells: serde_json::Map<String, serde_json::Value> = row
                        .cells
                        .iter()
                        .map(|(name, value)| (name.clone(), value.to_json()))
                        .collect();
                    json!({ "id": row.subject_id, "cells": cells })
                })
                .collect();
            Ok(json!({ "rows": rows, "audit": audit_json(&list.audit) }))
        }
        Command::Edit {
            principal,
            subject,
            changes,
        } => {
            let gateway = build_gateway(config)?;
            let (actor, source) = principal_of(&principal);
            let subject = read_subject(&subject)?;
            let changes = read_changes(&changes)?;
            let auth = gateway.authorize_edit(&actor, &subject, changes, &source);

            let accepted: serde_json::Map<String, serde_json::Value> = auth
                .accepted
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            let rejected: serde_json::Map<String, serde_json::Value> = auth
                .rejected
                .iter()
                .map(|(name, reason)| (name.clone(), json!(reason.to_string())))
                .collect();
            Ok(json!({
                "accepted": accepted,
                "rejected": rejected,
                "audit": auth.audit.as_ref().map(audit_json),
            }))
        }
    }
}

fn fieldset(config: &EngineConfig, role: &str) -> Result<serde_json::Value> {
    let registry = load_registry(config)?;
    let role = Role::parse(role)?;
    let sections: Vec<serde_json::Value> = registry
        .sections_for(&role)
        .into_iter()
        .map(|(section, fields)| json!({ "section": section, "fields": fields }))
        .collect();
    Ok(json!({ "role": role.as_str(), "sections": sections }))
}

fn verify(config: &EngineConfig) -> Result<serde_json::Value> {
    let entries: Vec<SealedEntry> = match config.audit_sink {
        AuditSinkKind::File => FileAuditSink::read_all(&config.audit_path)?,
        AuditSinkKind::Sled => {
            let db = sled::open(&config.audit_path)?;
            SledAuditSink::open(&db)?.entries()?
        }
        other => {
            return Err(Error::Config(format!(
                "audit sink {:?} keeps no readable trail",
                other
            )))
        }
    };
    verify_chain(&entries)?;
    tracing::info!(entries = entries.len(), "audit chain verified");
    Ok(json!({
        "entries": entries.len(),
        "head": entries.last().map(|e| e.hash.clone()),
        "valid": true,
    }))
}

fn principal_of(args: &PrincipalArgs) -> (Principal, SourceAddress) {
    let principal = Principal::new(&args.actor_id, &args.actor_label, args.role.as_deref());
    let source =
        SourceAddress::from_forwarded(args.forwarded_for.as_deref(), args.remote_addr.as_deref());
    (principal, source)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn read_subject(path: &Path) -> Result<Subject> {
    Subject::from_json(&read_json(path)?).ok_or_else(|| {
        Error::Config(format!("{} must hold a JSON object", path.display()))
    })
}

fn read_subjects(path: &Path) -> Result<Vec<Subject>> {
    let json = read_json(path)?;
    let items = json
        .as_array()
        .ok_or_else(|| Error::Config(format!("{} must hold a JSON array", path.display())))?;
    items
        .iter()
        .map(|item| {
            Subject::from_json(item).ok_or_else(|| {
                Error::Config(format!("{} contains a non-object entry", path.display()))
            })
        })
        .collect()
}

fn read_changes(path: &Path) -> Result<Vec<(String, Value)>> {
    let json = read_json(path)?;
    let object = json
        .as_object()
        .ok_or_else(|| Error::Config(format!("{} must hold a JSON object", path.display())))?;
    Ok(object
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect())
}

fn audit_json(audit: &AuditResult<RecordHandle>) -> serde_json::Value {
    match audit {
        Ok(handle) => json!({
            "status": "recorded",
            "sequence": handle.sequence,
            "hash": handle.hash,
        }),
        Err(e) => json!({ "status": "failed", "error": e.to_string() }),
    }
}
