//! Request context: who is asking, about whom, and from where.
//!
//! These types are created by the outer layers (authentication, persistence,
//! HTTP) and consumed read-only by the policy engine.

use crate::value::Value;
use std::collections::HashMap;

/// The authenticated actor making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable actor identifier.
    pub id: String,
    /// Display label, typically the login email.
    pub label: String,
    /// Role marker established at authentication time.
    pub role_marker: Option<String>,
}

impl Principal {
    /// Create a principal with an explicit role marker.
    pub fn new(id: impl Into<String>, label: impl Into<String>, role_marker: Option<&str>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            role_marker: role_marker.map(str::to_string),
        }
    }

    /// Create a principal from the account flags used by the user store.
    ///
    /// Superuser takes precedence over staff. An account with neither flag
    /// carries no marker and resolves to no role.
    pub fn from_flags(
        id: impl Into<String>,
        label: impl Into<String>,
        is_superuser: bool,
        is_staff: bool,
    ) -> Self {
        let marker = if is_superuser {
            Some("superuser")
        } else if is_staff {
            Some("staff")
        } else {
            None
        };
        Self::new(id, label, marker)
    }
}

/// The user record being viewed or edited.
///
/// Owned by the persistence layer; the engine never mutates it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subject {
    /// Record identifier.
    pub id: String,
    /// Display label (email).
    pub label: String,
    fields: HashMap<String, Value>,
}

impl Subject {
    /// Create a subject with no field values.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            fields: HashMap::new(),
        }
    }

    /// Set a raw field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a subject from a JSON object.
    ///
    /// `id` and `email` become the identifier and label; every key becomes a
    /// field. Returns `None` if the document is not an object.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        let text = |key: &str| match object.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let mut subject = Subject::new(text("id"), text("email"));
        for (name, value) in object {
            subject.fields.insert(name.clone(), Value::from_json(value));
        }
        Some(subject)
    }

    /// Raw value for a field, if the record holds it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Network origin of a request, recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress(String);

impl SourceAddress {
    /// Placeholder used when no address is available.
    pub const UNKNOWN: &'static str = "unknown";

    /// Wrap a known address.
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        if addr.trim().is_empty() {
            Self::unknown()
        } else {
            Self(addr.trim().to_string())
        }
    }

    /// An address that could not be determined.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// Derive the client address from proxy headers.
    ///
    /// The first hop of `X-Forwarded-For` wins; otherwise the peer address is
    /// used.
    pub fn from_forwarded(forwarded_for: Option<&str>, remote_addr: Option<&str>) -> Self {
        let first_hop = forwarded_for
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        match first_hop.or(remote_addr) {
            Some(addr) => Self::new(addr),
            None => Self::unknown(),
        }
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
