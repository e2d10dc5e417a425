//! Capability roles and role resolution.
//!
//! Roles form an open set: a role is a validated identifier, and what it may
//! do is decided entirely by the field policy table. Adding a role means
//! adding it to policy rows, not adding branches here.

use super::context::Principal;
use super::error::{SecurityError, SecurityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const SUPERUSER: &str = "superuser";
const STAFF: &str = "staff";
const DENY_ALL: &str = "!deny-all";

/// A capability role identifier.
///
/// Identifiers are lowercase ASCII letters, digits, `_` and `-`. The reserved
/// deny-all role cannot be produced by parsing, so no policy row can grant it
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Role(String);

impl Role {
    /// Parse a role identifier.
    ///
    /// Input is trimmed and lowercased before validation.
    pub fn parse(s: &str) -> SecurityResult<Self> {
        let name = s.trim().to_ascii_lowercase();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if valid {
            Ok(Role(name))
        } else {
            Err(SecurityError::UnknownRole(s.to_string()))
        }
    }

    /// Full-access role, exempt from masking on every built-in field.
    pub fn superuser() -> Self {
        Role(SUPERUSER.to_string())
    }

    /// Support staff role: non-sensitive fields only.
    pub fn staff() -> Self {
        Role(STAFF.to_string())
    }

    /// The most restrictive role, used when resolution fails.
    pub fn deny_all() -> Self {
        Role(DENY_ALL.to_string())
    }

    /// Whether this is the fail-closed fallback role.
    pub fn is_deny_all(&self) -> bool {
        self.0 == DENY_ALL
    }

    /// The role identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Role {
    type Error = SecurityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0
    }
}

/// Maps an authenticated principal to a capability role.
///
/// The resolver only accepts roles that appear in the policy registry, so a
/// principal whose marker names a role nobody configured is rejected rather
/// than silently treated as an empty-permission role.
#[derive(Debug, Clone, Default)]
pub struct RoleResolver {
    known: BTreeSet<Role>,
}

impl RoleResolver {
    /// Create a resolver that accepts the given roles.
    pub fn new(known: impl IntoIterator<Item = Role>) -> Self {
        Self {
            known: known.into_iter().filter(|r| !r.is_deny_all()).collect(),
        }
    }

    /// Resolve the principal's role marker.
    pub fn resolve(&self, principal: &Principal) -> SecurityResult<Role> {
        let marker = principal
            .role_marker
            .as_deref()
            .ok_or_else(|| SecurityError::UnknownRole("<none>".to_string()))?;
        let role = Role::parse(marker)?;
        if self.known.contains(&role) {
            Ok(role)
        } else {
            Err(SecurityError::UnknownRole(marker.to_string()))
        }
    }

    /// Resolve the role, falling back to [`Role::deny_all`] on failure.
    pub fn resolve_or_deny(&self, principal: &Principal) -> Role {
        match self.resolve(principal) {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(
                    principal = %principal.id,
                    error = %e,
                    "role resolution failed, denying all fields"
                );
                Role::deny_all()
            }
        }
    }

    /// Roles accepted by this resolver.
    pub fn known_roles(&self) -> impl Iterator<Item = &Role> {
        self.known.iter()
    }
}
