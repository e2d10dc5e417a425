//! Entry points for the view layer.
//!
//! [`AccessGateway`] runs the policy engine for a request and then records
//! one audit entry for it. The decision is complete before the audit write
//! starts, and the audit outcome is reported next to the decision rather
//! than folded into it.

use super::audit::{AuditAction, AuditEntry, AuditRecorder, RecordHandle};
use super::context::{Principal, SourceAddress, Subject};
use super::engine::{AccessDecision, PolicyEngine};
use super::error::AuditResult;
use crate::value::Value;
use std::sync::Arc;

/// Columns shown when listing user records.
pub const LIST_COLUMNS: &[&str] = &[
    "email",
    "display_name",
    "phone_number",
    "is_hcw",
    "email_verified",
    "is_staff",
    "created_at",
];

/// Placeholder for an empty list cell.
pub const EMPTY_CELL: &str = "-";

/// Decisions for one record plus the outcome of auditing the view.
#[derive(Debug)]
pub struct DetailView {
    /// One decision per requested field, in request order.
    pub decisions: Vec<AccessDecision>,
    /// Result of recording the access.
    pub audit: AuditResult<RecordHandle>,
}

impl DetailView {
    /// Visible fields as a JSON object.
    ///
    /// Hidden fields are absent from the object, not present as null.
    pub fn render(&self) -> serde_json::Map<String, serde_json::Value> {
        render_decisions(&self.decisions)
    }

    /// Names of fields the viewer may change.
    pub fn editable_fields(&self) -> Vec<&str> {
        self.decisions
            .iter()
            .filter(|d| d.editable)
            .map(|d| d.field.as_str())
            .collect()
    }
}

/// One row of a list view.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRow {
    /// Record identifier.
    pub subject_id: String,
    /// Visible cells in column order.
    pub cells: Vec<(String, Value)>,
}

/// Rows for many records plus the outcome of auditing the listing.
#[derive(Debug)]
pub struct ListView {
    /// Rows in subject order.
    pub rows: Vec<ListRow>,
    /// Result of recording the access.
    pub audit: AuditResult<RecordHandle>,
}

/// Why a proposed change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditRejection {
    /// The field is not in the policy registry.
    UnknownField,
    /// The editor may not see the field.
    NotVisible,
    /// The field is visible but not editable by the editor.
    ReadOnly,
}

impl std::fmt::Display for EditRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditRejection::UnknownField => write!(f, "unknown field"),
            EditRejection::NotVisible => write!(f, "field not visible"),
            EditRejection::ReadOnly => write!(f, "field is read-only"),
        }
    }
}

/// Outcome of checking a set of proposed changes.
///
/// Accepted changes are applied by the persistence layer, not here.
#[derive(Debug)]
pub struct EditAuthorization {
    /// Changes the editor may apply, in request order.
    pub accepted: Vec<(String, Value)>,
    /// Changes refused, with the reason.
    pub rejected: Vec<(String, EditRejection)>,
    /// Audit outcome; `None` when nothing was accepted.
    pub audit: Option<AuditResult<RecordHandle>>,
}

/// Runs decisions and records them.
#[derive(Debug, Clone)]
pub struct AccessGateway {
    engine: PolicyEngine,
    recorder: Arc<AuditRecorder>,
}

impl AccessGateway {
    /// Create a gateway.
    pub fn new(engine: PolicyEngine, recorder: Arc<AuditRecorder>) -> Self {
        Self { engine, recorder }
    }

    /// The policy engine.
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// The audit recorder.
    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// Open a record with the viewer's own fieldset.
    pub fn view_detail(
        &self,
        principal: &Principal,
        subject: &Subject,
        source: &SourceAddress,
    ) -> DetailView {
        let role = self.engine.role_of(principal);
        let fields = self.engine.fieldset_for(&role);
        self.view_fields(principal, subject, &fields, source)
    }

    /// Open a record, deciding only the requested fields.
    ///
    /// Records exactly one `ViewDetail` entry however many fields are asked for.
    pub fn view_fields<S: AsRef<str>>(
        &self,
        principal: &Principal,
        subject: &Subject,
        field_names: &[S],
        source: &SourceAddress,
    ) -> DetailView {
        let decisions = self.engine.decide_all(principal, subject, field_names);
        let audit = self.recorder.record(AuditEntry::new(
            AuditAction::ViewDetail,
            principal,
            &subject.id,
            &subject.label,
            source,
        ));
        DetailView { decisions, audit }
    }

    /// List records with the list columns.
    ///
    /// Records exactly one `ViewList` entry for the whole listing.
    pub fn view_list(
        &self,
        principal: &Principal,
        subjects: &[Subject],
        source: &SourceAddress,
    ) -> ListView {
        let role = self.engine.role_of(principal);
        let rows = subjects
            .iter()
            .map(|subject| ListRow {
                subject_id: subject.id.clone(),
                cells: LIST_COLUMNS
                    .iter()
                    .map(|column| self.engine.decide_for_role(&role, subject, column))
                    .filter_map(|decision| list_cell(subject, decision))
                    .collect(),
            })
            .collect();

        let audit = self.recorder.record(AuditEntry::new(
            AuditAction::ViewList,
            principal,
            "*",
            format!("{} records", subjects.len()),
            source,
        ));
        ListView { rows, audit }
    }

    /// Check proposed changes against the editor's rights.
    ///
    /// Records one `EditField` entry if any change is accepted.
    pub fn authorize_edit(
        &self,
        principal: &Principal,
        subject: &Subject,
        changes: Vec<(String, Value)>,
        source: &SourceAddress,
    ) -> EditAuthorization {
        let role = self.engine.role_of(principal);
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for (field, value) in changes {
            if self.engine.registry().lookup(&field).is_err() {
                rejected.push((field, EditRejection::UnknownField));
                continue;
            }
            let decision = self.engine.decide_for_role(&role, subject, &field);
            if !decision.visible {
                rejected.push((field, EditRejection::NotVisible));
            } else if !decision.editable {
                rejected.push((field, EditRejection::ReadOnly));
            } else {
                accepted.push((field, value));
            }
        }

        if !rejected.is_empty() {
            let refused: Vec<&str> = rejected.iter().map(|(field, _)| field.as_str()).collect();
            tracing::warn!(
                principal = %principal.id,
                role = %role,
                subject = %subject.id,
                source = %source,
                refused = ?refused,
                "edit refused"
            );
        }

        let audit = (!accepted.is_empty()).then(|| {
            self.recorder.record(AuditEntry::new(
                AuditAction::EditField,
                principal,
                &subject.id,
                &subject.label,
                source,
            ))
        });

        EditAuthorization {
            accepted,
            rejected,
            audit,
        }
    }
}

/// Visible decisions as a JSON object, omitting hidden fields.
pub fn render_decisions(decisions: &[AccessDecision]) -> serde_json::Map<String, serde_json::Value> {
    decisions
        .iter()
        .filter(|d| d.visible)
        .filter_map(|d| d.rendered_value.as_ref().map(|v| (d.field.clone(), v.to_json())))
        .collect()
}

fn list_cell(subject: &Subject, decision: AccessDecision) -> Option<(String, Value)> {
    if !decision.visible {
        return None;
    }
    let empty = match subject.get(&decision.field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    let value = if empty {
        Value::from(EMPTY_CELL)
    } else {
        decision.rendered_value?
    };
    Some((decision.field, value))
}
