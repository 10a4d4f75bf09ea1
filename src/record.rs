//! Access-event records (ECs)
//!
//! A record is validated once at the boundary ([`Record::from_json`]) and
//! then carried through every stage. The identifier, kind and identity
//! provider are typed; every other attribute stays in a flat map so fields
//! the stages do not know about pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::fields::{Field, NOT_APPLICABLE};
use crate::types::{EnrichError, Result};

/// Attribute carrying the Shibboleth identity provider
const IDENTITY_PROVIDER: &str = "Shib-Identity-Provider";

/// Resource type of an EC, as set by the platform parser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordKind {
    /// Access to a thesis document
    PhdThesis,
    /// Thesis notice (defended or in preparation)
    Abstract,
    /// Person or organization page, not yet resolved
    Record,
    /// Resolved person page
    Biography,
    Other(String),
}

impl RecordKind {
    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::PhdThesis => "PHD_THESIS",
            RecordKind::Abstract => "ABS",
            RecordKind::Record => "RECORD",
            RecordKind::Biography => "BIO",
            RecordKind::Other(s) => s,
        }
    }
}

impl From<String> for RecordKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PHD_THESIS" => RecordKind::PhdThesis,
            "ABS" => RecordKind::Abstract,
            "RECORD" => RecordKind::Record,
            "BIO" => RecordKind::Biography,
            _ => RecordKind::Other(s),
        }
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One access event being enriched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier used as cache and query key (NNT, subject number or PPN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unitid: Option<String>,

    /// Kind discriminator routing the record to a strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtype: Option<RecordKind>,

    /// Shibboleth identity provider of the user, when authenticated
    #[serde(
        rename = "Shib-Identity-Provider",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_provider: Option<String>,

    /// Every other attribute, output fields included
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Record {
    /// Create a record with an identifier and a kind
    pub fn new(unitid: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            unitid: Some(unitid.into()),
            rtype: Some(kind),
            ..Default::default()
        }
    }

    /// Set the identity provider
    pub fn with_identity_provider(mut self, idp: impl Into<String>) -> Self {
        self.identity_provider = Some(idp.into());
        self
    }

    /// Validate a raw JSON event. A non-string `unitid`, `rtype` or
    /// identity provider is left among the attributes untouched, so the
    /// record passes through the stages unenriched.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut attributes) = value else {
            return Err(EnrichError::InvalidRecord(format!(
                "expected a JSON object, got {}",
                value
            )));
        };

        let unitid = take_string(&mut attributes, "unitid");
        let rtype = take_string(&mut attributes, "rtype").map(RecordKind::from);
        let identity_provider = take_string(&mut attributes, IDENTITY_PROVIDER);

        Ok(Self {
            unitid,
            rtype,
            identity_provider,
            attributes,
        })
    }

    /// Parse one JSON line
    pub fn from_json_line(line: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| EnrichError::InvalidRecord(e.to_string()))?;
        Self::from_json(value)
    }

    /// Usable identifier (non-blank)
    pub fn identifier(&self) -> Option<&str> {
        self.unitid
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn kind(&self) -> Option<&RecordKind> {
        self.rtype.as_ref()
    }

    /// Whether the record has one of the given kinds
    pub fn is_kind(&self, kinds: &[RecordKind]) -> bool {
        self.rtype.as_ref().is_some_and(|k| kinds.contains(k))
    }

    /// Read an output field
    pub fn get(&self, field: Field) -> Option<&str> {
        self.attributes.get(field.as_str()).and_then(Value::as_str)
    }

    /// Write an output field, replacing any previous value
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.attributes
            .insert(field.as_str().to_string(), Value::String(value.into()));
    }

    /// Fill the given fields with the "not applicable" sentinel
    pub fn mark_not_applicable(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.set(field, NOT_APPLICABLE);
        }
    }
}

/// Remove `key` when it holds a string
fn take_string(attributes: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !matches!(attributes.get(key), Some(Value::String(_))) {
        return None;
    }
    match attributes.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
