//! Field-level policy and masking.
//!
//! A [`FieldPolicy`] says which roles may see and edit a field and how the
//! value is redacted for roles that may see it but are not exempt from
//! masking. [`FieldMasker`] holds the masking transforms themselves.

use super::capability::Role;
use super::error::{SecurityError, SecurityResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Output of `PhoneLast4` when fewer than four trailing digits exist.
pub const PHONE_FALLBACK: &str = "***-????";

/// Output of `YearOnly` when the value has no date components.
pub const DATE_FALLBACK: &str = "****-**-**";

/// Masking strategy applied to a visible field for non-exempt roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingStrategy {
    /// Show only the last four digits: `***-4567`.
    PhoneLast4,
    /// Show only the year of a date: `1990-**-**`.
    YearOnly,
    /// Never render a value; the field is omitted.
    FullyHidden,
}

impl std::fmt::Display for MaskingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskingStrategy::PhoneLast4 => write!(f, "phone_last4"),
            MaskingStrategy::YearOnly => write!(f, "year_only"),
            MaskingStrategy::FullyHidden => write!(f, "fully_hidden"),
        }
    }
}

/// Result of masking a raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskedValue {
    /// Render this value in place of the raw one.
    Value(Value),
    /// Render nothing; the field must be left out of the output.
    Omitted,
}

/// Pure masking transforms.
///
/// Every transform is total: malformed input degrades to the strategy's
/// fixed fallback and never reveals more than the strategy intends.
pub struct FieldMasker;

impl FieldMasker {
    /// Mask a value according to the strategy.
    ///
    /// Null stays null for the value-preserving strategies; there is nothing
    /// to redact in an unset field.
    pub fn mask(value: &Value, strategy: MaskingStrategy) -> MaskedValue {
        match strategy {
            MaskingStrategy::FullyHidden => MaskedValue::Omitted,
            _ if value.is_null() => MaskedValue::Value(Value::Null),
            MaskingStrategy::PhoneLast4 => MaskedValue::Value(Value::String(Self::phone_last4(value))),
            MaskingStrategy::YearOnly => MaskedValue::Value(Value::String(Self::year_only(value))),
        }
    }

    /// Keep the last four digits of the final run of digits.
    fn phone_last4(value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            _ => return PHONE_FALLBACK.to_string(),
        };

        let digits: Vec<char> = text
            .chars()
            .rev()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();

        if digits.len() < 4 {
            return PHONE_FALLBACK.to_string();
        }
        let last4: String = digits[..4].iter().rev().collect();
        format!("***-{}", last4)
    }

    fn year_only(value: &Value) -> String {
        use chrono::Datelike;

        match value.as_date() {
            Some(date) => format!("{:04}-**-**", date.year()),
            None => DATE_FALLBACK.to_string(),
        }
    }
}

/// Per-field access rule.
///
/// Invariants, checked by [`FieldPolicy::validate`]:
/// - `editable_by` is a subset of `viewable_by`;
/// - an always-readonly field has an empty `editable_by`;
/// - a sensitive field without masking is visible only to `unmasked_for`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    /// Field name as stored on the subject record.
    pub name: String,
    /// Roles that may see the field (raw or masked).
    #[serde(default)]
    pub viewable_by: BTreeSet<Role>,
    /// Roles that may change the field.
    #[serde(default)]
    pub editable_by: BTreeSet<Role>,
    /// Masking applied for visible, non-exempt roles.
    #[serde(default)]
    pub masking: Option<MaskingStrategy>,
    /// Roles that always see the raw value.
    #[serde(default)]
    pub unmasked_for: BTreeSet<Role>,
    /// Never editable, whatever the role.
    #[serde(default)]
    pub always_readonly: bool,
    /// Personal data; left out of detail fieldsets for masked roles.
    #[serde(default)]
    pub sensitive: bool,
    /// Form section the field is grouped under.
    #[serde(default)]
    pub section: Option<String>,
    /// Roles that see the field as a list column but not on the detail form.
    #[serde(default)]
    pub list_only_for: BTreeSet<Role>,
}

impl FieldPolicy {
    /// Create a policy that grants nothing to anyone.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            viewable_by: BTreeSet::new(),
            editable_by: BTreeSet::new(),
            masking: None,
            unmasked_for: BTreeSet::new(),
            always_readonly: false,
            sensitive: false,
            section: None,
            list_only_for: BTreeSet::new(),
        }
    }

    /// Grant visibility to roles.
    pub fn viewable_by(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.viewable_by.extend(roles);
        self
    }

    /// Grant edit rights to roles.
    pub fn editable_by(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.editable_by.extend(roles);
        self
    }

    /// Set the masking strategy.
    pub fn masked(mut self, strategy: MaskingStrategy) -> Self {
        self.masking = Some(strategy);
        self
    }

    /// Exempt roles from masking.
    pub fn unmasked_for(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.unmasked_for.extend(roles);
        self
    }

    /// Mark the field as never editable. Clears any edit grants.
    pub fn always_readonly(mut self) -> Self {
        self.always_readonly = true;
        self.editable_by.clear();
        self
    }

    /// Mark the field as sensitive personal data.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Group the field under a form section.
    pub fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Keep the field off the detail form for these roles.
    pub fn list_only_for(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.list_only_for.extend(roles);
        self
    }

    /// Whether the role may see this field in any form.
    pub fn is_visible_to(&self, role: &Role) -> bool {
        self.viewable_by.contains(role)
    }

    /// Whether the role may edit this field.
    ///
    /// Visibility and editability are independent axes; read-only wins over
    /// any edit grant.
    pub fn is_editable_by(&self, role: &Role) -> bool {
        !self.always_readonly && self.is_visible_to(role) && self.editable_by.contains(role)
    }

    /// Whether the role sees the raw value.
    pub fn is_unmasked_for(&self, role: &Role) -> bool {
        self.masking.is_none() || self.unmasked_for.contains(role)
    }

    /// Whether the field belongs in the role's detail fieldset.
    pub fn in_fieldset_for(&self, role: &Role) -> bool {
        self.is_visible_to(role)
            && !self.list_only_for.contains(role)
            && (!self.sensitive || self.unmasked_for.contains(role))
    }

    /// Check the policy invariants.
    pub fn validate(&self) -> SecurityResult<()> {
        if self.name.trim().is_empty() {
            return Err(SecurityError::InvalidPolicy(
                "field name must not be empty".to_string(),
            ));
        }
        if let Some(role) = self.editable_by.iter().find(|r| !self.viewable_by.contains(r)) {
            return Err(SecurityError::InvalidPolicy(format!(
                "field '{}' is editable by '{}' which cannot view it",
                self.name, role
            )));
        }
        if self.sensitive && self.masking.is_none() {
            if let Some(role) = self.viewable_by.iter().find(|r| !self.unmasked_for.contains(r)) {
                return Err(SecurityError::InvalidPolicy(format!(
                    "sensitive field '{}' is visible to '{}' but has no masking",
                    self.name, role
                )));
            }
        }
        if self.always_readonly && !self.editable_by.is_empty() {
            return Err(SecurityError::InvalidPolicy(format!(
                "field '{}' is always read-only but grants edit rights",
                self.name
            )));
        }
        Ok(())
    }
}
