//! Categorization rules document.
//!
//! The rules file is the one piece of state shared by every loop. Its version
//! is the SHA-256 of its bytes, so a byte-identical restore is also a
//! version-identical restore. Keys rulesmith does not edit are carried through
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::domain::errors::{DomainError, DomainResult};

use super::proposal::RuleField;

/// Rule for one category slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CategoryRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_accept_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_attributes: Vec<String>,
    /// Keys owned by the pipeline, such as `lexical_weight`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CategoryRule {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn scalar(&self, field: RuleField) -> Option<f64> {
        match field {
            RuleField::MinConfidence => self.min_confidence,
            RuleField::AutoAcceptThreshold => self.auto_accept_threshold,
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, field: RuleField, value: Option<f64>) {
        match field {
            RuleField::MinConfidence => self.min_confidence = value,
            RuleField::AutoAcceptThreshold => self.auto_accept_threshold = value,
            _ => {}
        }
    }

    pub fn list(&self, field: RuleField) -> &[String] {
        match field {
            RuleField::IncludeTerms => &self.include_terms,
            RuleField::ExcludeTerms => &self.exclude_terms,
            RuleField::RequiredAttributes => &self.required_attributes,
            _ => &[],
        }
    }

    pub fn list_mut(&mut self, field: RuleField) -> Option<&mut Vec<String>> {
        match field {
            RuleField::IncludeTerms => Some(&mut self.include_terms),
            RuleField::ExcludeTerms => Some(&mut self.exclude_terms),
            RuleField::RequiredAttributes => Some(&mut self.required_attributes),
            _ => None,
        }
    }

    /// Field value as JSON; `null` for an unset scalar.
    pub fn field_value(&self, field: RuleField) -> Value {
        if field.is_list() {
            Value::from(self.list(field).to_vec())
        } else {
            self.scalar(field).map_or(Value::Null, Value::from)
        }
    }
}

/// The whole rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RulesDocument {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryRule>,
    /// Top-level keys other than `categories`, such as `schema_version`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RulesDocument {
    /// Canonical file bytes: pretty JSON with a trailing newline.
    pub fn to_canonical_bytes(&self) -> DomainResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> DomainResult<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::RulesStorage(format!("invalid rules document: {e}")))
    }

    pub fn rule(&self, slug: &str) -> Option<&CategoryRule> {
        self.categories.get(slug)
    }
}

/// Content hash used as the rules version.
pub fn rules_version(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A rules document together with the exact bytes it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesSnapshot {
    pub document: RulesDocument,
    pub version: String,
    pub raw: Vec<u8>,
}

impl RulesSnapshot {
    pub fn from_bytes(raw: Vec<u8>) -> DomainResult<Self> {
        let document = RulesDocument::from_bytes(&raw)?;
        Ok(Self { document, version: rules_version(&raw), raw })
    }

    pub fn from_document(document: RulesDocument) -> DomainResult<Self> {
        let raw = document.to_canonical_bytes()?;
        Ok(Self { document, version: rules_version(&raw), raw })
    }
}
