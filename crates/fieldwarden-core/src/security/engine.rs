//! Per-field access decisions.
//!
//! The engine is a pure function of (role, subject, registry). It holds no
//! mutable state, so one instance can serve any number of threads.

use super::capability::{Role, RoleResolver};
use super::context::{Principal, Subject};
use super::error::SecurityError;
use super::field_security::{FieldMasker, FieldPolicy, MaskedValue};
use super::registry::FieldPolicyRegistry;
use crate::value::Value;
use std::sync::Arc;

/// The engine's verdict for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    /// Field the decision applies to.
    pub field: String,
    /// Whether the field may appear in output at all.
    pub visible: bool,
    /// Whether the viewer may change the field.
    pub editable: bool,
    /// Raw or masked value; `None` whenever `visible` is false.
    pub rendered_value: Option<Value>,
}

impl AccessDecision {
    /// A decision that hides the field.
    pub fn deny(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            visible: false,
            editable: false,
            rendered_value: None,
        }
    }
}

/// Computes access decisions against an immutable registry.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    registry: Arc<FieldPolicyRegistry>,
    resolver: RoleResolver,
}

impl PolicyEngine {
    /// Create an engine that accepts every role named by the registry.
    pub fn new(registry: Arc<FieldPolicyRegistry>) -> Self {
        let resolver = registry.resolver();
        Self { registry, resolver }
    }

    /// Replace the role resolver.
    pub fn with_resolver(mut self, resolver: RoleResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The registry decisions are made against.
    pub fn registry(&self) -> &FieldPolicyRegistry {
        &self.registry
    }

    /// Resolve the principal's role, falling back to deny-all.
    pub fn role_of(&self, principal: &Principal) -> Role {
        self.resolver.resolve_or_deny(principal)
    }

    /// Ordered detail-view fields for a role.
    pub fn fieldset_for(&self, role: &Role) -> Vec<&str> {
        self.registry.fieldset_for(role)
    }

    /// Decide access to a single field.
    pub fn decide(&self, principal: &Principal, subject: &Subject, field_name: &str) -> AccessDecision {
        let role = self.role_of(principal);
        self.decide_for_role(&role, subject, field_name)
    }

    /// Decide access to many fields.
    ///
    /// The result has one decision per requested field, in request order. A
    /// failure on one field becomes a deny for that field only.
    pub fn decide_all<S: AsRef<str>>(
        &self,
        principal: &Principal,
        subject: &Subject,
        field_names: &[S],
    ) -> Vec<AccessDecision> {
        let role = self.role_of(principal);
        field_names
            .iter()
            .map(|name| self.decide_for_role(&role, subject, name.as_ref()))
            .collect()
    }

    /// Decide access to a field for an already-resolved role.
    pub fn decide_for_role(&self, role: &Role, subject: &Subject, field_name: &str) -> AccessDecision {
        match self.registry.lookup(field_name) {
            Ok(policy) => Self::apply(policy, role, subject),
            Err(SecurityError::UnknownField(field)) => {
                tracing::warn!(field = %field, role = %role, "unknown field, denying");
                AccessDecision::deny(field_name)
            }
            Err(e) => {
                tracing::warn!(field = %field_name, error = %e, "policy lookup failed, denying");
                AccessDecision::deny(field_name)
            }
        }
    }

    fn apply(policy: &FieldPolicy, role: &Role, subject: &Subject) -> AccessDecision {
        if !policy.is_visible_to(role) {
            return AccessDecision::deny(&policy.name);
        }

        let raw = subject.get(&policy.name).cloned().unwrap_or(Value::Null);
        let rendered = match policy.masking {
            Some(strategy) if !policy.is_unmasked_for(role) => {
                match FieldMasker::mask(&raw, strategy) {
                    MaskedValue::Value(masked) => masked,
                    MaskedValue::Omitted => return AccessDecision::deny(&policy.name),
                }
            }
            _ => raw,
        };

        AccessDecision {
            field: policy.name.clone(),
            visible: true,
            editable: policy.is_editable_by(role),
            rendered_value: Some(rendered),
        }
    }
}
