//! The field policy registry.
//!
//! The registry is built once, before any decision is served, and is
//! immutable afterwards. Share it behind an `Arc` rather than rebuilding it
//! per request.

use super::capability::{Role, RoleResolver};
use super::error::{SecurityError, SecurityResult};
use super::field_security::{FieldPolicy, MaskingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Serialized form of a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Configuration version label.
    #[serde(default)]
    pub version: String,
    /// Field policies in display order.
    pub fields: Vec<FieldPolicy>,
}

/// Immutable table of field policies.
#[derive(Debug, Clone)]
pub struct FieldPolicyRegistry {
    version: String,
    order: Vec<FieldPolicy>,
    index: HashMap<String, usize>,
    roles: BTreeSet<Role>,
}

impl FieldPolicyRegistry {
    /// Start building a registry.
    pub fn builder(version: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder {
            version: version.into(),
            fields: Vec::new(),
        }
    }

    /// Build a registry from its serialized form.
    pub fn from_document(document: RegistryDocument) -> SecurityResult<Self> {
        let mut builder = Self::builder(document.version);
        for policy in document.fields {
            builder = builder.field(policy);
        }
        builder.build()
    }

    /// Parse a registry from JSON text.
    pub fn from_json(json: &str) -> SecurityResult<Self> {
        let document: RegistryDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Load a registry from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_json(&text)?;
        tracing::info!(
            path = %path.as_ref().display(),
            version = %registry.version,
            fields = registry.len(),
            "field policy registry loaded"
        );
        Ok(registry)
    }

    /// Serialize back to a document.
    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            version: self.version.clone(),
            fields: self.order.clone(),
        }
    }

    /// Look up the policy for a field.
    pub fn lookup(&self, field_name: &str) -> SecurityResult<&FieldPolicy> {
        self.index
            .get(field_name)
            .map(|&i| &self.order[i])
            .ok_or_else(|| SecurityError::UnknownField(field_name.to_string()))
    }

    /// Fields that make up the role's detail view, in registry order.
    ///
    /// Sensitive fields are left out entirely for roles that would only see
    /// them masked.
    pub fn fieldset_for(&self, role: &Role) -> Vec<&str> {
        self.order
            .iter()
            .filter(|p| p.in_fieldset_for(role))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The role's fieldset grouped by form section, preserving order.
    ///
    /// Fields without a section are grouped under the empty label.
    pub fn sections_for(&self, role: &Role) -> Vec<(String, Vec<&str>)> {
        let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
        for policy in self.order.iter().filter(|p| p.in_fieldset_for(role)) {
            let label = policy.section.clone().unwrap_or_default();
            match sections.iter_mut().find(|(name, _)| *name == label) {
                Some((_, fields)) => fields.push(&policy.name),
                None => sections.push((label, vec![&policy.name])),
            }
        }
        sections
    }

    /// A resolver accepting every role that appears in this registry.
    pub fn resolver(&self) -> RoleResolver {
        RoleResolver::new(self.roles.iter().cloned())
    }

    /// Every role named by some policy.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter()
    }

    /// All policies in registry order.
    pub fn policies(&self) -> impl Iterator<Item = &FieldPolicy> {
        self.order.iter()
    }

    /// Configuration version label.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry has no fields.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The user-accounts table.
    ///
    /// Superusers see and edit everything unmasked, except the fields that
    /// are always read-only. Staff see the non-sensitive profile, status, and
    /// date fields; they may edit profile fields and the active flag but not
    /// email, verification, or staff status.
    /// Phone and birth date render masked for staff in list views; staff and
    /// verification flags appear there as columns but not on the staff form.
    pub fn user_accounts() -> Self {
        let su = || Role::superuser();
        let both = || [Role::superuser(), Role::staff()];

        let field = |name: &str, section: &str| FieldPolicy::new(name).in_section(section);
        let superuser_only = |name: &str, section: &str| {
            field(name, section).viewable_by([su()]).editable_by([su()])
        };
        let shared = |name: &str, section: &str| {
            field(name, section).viewable_by(both()).editable_by(both())
        };

        let builder = Self::builder("user-accounts/1")
            // Login
            .field(field("email", "").viewable_by(both()).editable_by([su()]))
            .field(superuser_only("password", ""))
            // Profile
            .field(shared("display_name", "Personal Info"))
            .field(shared("first_name", "Personal Info"))
            .field(shared("last_name", "Personal Info"))
            .field(shared("profile_photo_url", "Personal Info"))
            .field(shared("bio", "Personal Info"))
            .field(shared("pronouns", "Personal Info"))
            .field(
                superuser_only("phone_number", "Personal Info")
                    .viewable_by([Role::staff()])
                    .masked(MaskingStrategy::PhoneLast4)
                    .unmasked_for([su()])
                    .sensitive(),
            )
            .field(
                superuser_only("birth_date", "Personal Info")
                    .viewable_by([Role::staff()])
                    .masked(MaskingStrategy::YearOnly)
                    .unmasked_for([su()])
                    .sensitive(),
            )
            .field(
                superuser_only("location", "Personal Info")
                    .masked(MaskingStrategy::FullyHidden)
                    .unmasked_for([su()])
                    .sensitive(),
            )
            // Attestation
            .field(shared("is_hcw", "HCW Status"))
            .field(field("hcw_attested_at", "HCW Status").viewable_by([su()]).always_readonly())
            // Permissions
            .field(shared("is_active", "Permissions"))
            .field(
                field("is_staff", "Permissions")
                    .viewable_by(both())
                    .editable_by([su()])
                    .list_only_for([Role::staff()]),
            )
            .field(superuser_only("is_superuser", "Permissions"))
            .field(superuser_only("groups", "Permissions"))
            .field(superuser_only("user_permissions", "Permissions"))
            // Verification
            .field(
                field("email_verified", "Email Verification")
                    .viewable_by(both())
                    .editable_by([su()])
                    .list_only_for([Role::staff()]),
            )
            .field(superuser_only("email_verification_token", "Email Verification"))
            .field(superuser_only("email_verification_sent_at", "Email Verification"))
            // OAuth
            .field(superuser_only("google_id", "OAuth"))
            // Dates
            .field(field("last_login_at", "Important dates").viewable_by(both()).always_readonly())
            .field(field("created_at", "Important dates").viewable_by(both()).always_readonly())
            .field(field("updated_at", "Important dates").viewable_by([su()]).always_readonly())
            .field(superuser_only("deleted_at", "Important dates"));

        builder
            .build()
            .expect("built-in registry satisfies policy invariants")
    }
}

/// Builder for [`FieldPolicyRegistry`].
///
/// Validation happens in [`RegistryBuilder::build`]; there is no way to
/// change a registry after that.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    version: String,
    fields: Vec<FieldPolicy>,
}

impl RegistryBuilder {
    /// Append a field policy.
    pub fn field(mut self, policy: FieldPolicy) -> Self {
        self.fields.push(policy);
        self
    }

    /// Validate and freeze the registry.
    pub fn build(self) -> SecurityResult<FieldPolicyRegistry> {
        let mut index = HashMap::with_capacity(self.fields.len());
        let mut roles = BTreeSet::new();

        for (i, policy) in self.fields.iter().enumerate() {
            policy.validate()?;
            if index.insert(policy.name.clone(), i).is_some() {
                return Err(SecurityError::InvalidPolicy(format!(
                    "duplicate field '{}'",
                    policy.name
                )));
            }
            roles.extend(policy.viewable_by.iter().cloned());
            roles.extend(policy.unmasked_for.iter().cloned());
        }

        Ok(FieldPolicyRegistry {
            version: self.version,
            order: self.fields,
            index,
            roles,
        })
    }
}
