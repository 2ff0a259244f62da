use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::tenant::{TenantId, UserId};

/// Amount keys that are summed across documents in a summary.
pub const TOTALLED_AMOUNTS: &[&str] =
    &["wages", "federal_withheld", "state_withheld", "interest_income", "dividend_income"];

const UNKNOWN_DOC_TYPE: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Photo,
    Document,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "photo" => Some(Self::Photo),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredArtifact {
    pub id: ArtifactId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub external_handle: String,
    pub display_name: Option<String>,
    pub kind: ArtifactKind,
    pub size: Option<i64>,
    pub secondary_ref: Option<String>,
    pub extraction: DocumentExtraction,
    pub created_at: DateTime<Utc>,
}

/// Structured reading of a tax document, produced by the vision extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentExtraction {
    #[serde(default = "unknown_doc_type", deserialize_with = "lenient_doc_type")]
    pub doc_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub payer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tax_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_amounts")]
    pub amounts: BTreeMap<String, Decimal>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Default for DocumentExtraction {
    fn default() -> Self {
        Self {
            doc_type: unknown_doc_type(),
            payer_name: None,
            tax_year: None,
            amounts: BTreeMap::new(),
            summary: None,
            file_name: None,
        }
    }
}

impl DocumentExtraction {
    pub fn for_file(file_name: impl Into<String>) -> Self {
        Self { doc_type: "pdf".to_owned(), file_name: Some(file_name.into()), ..Self::default() }
    }

    /// Decodes a persisted payload. Unparseable payloads decode to the default value.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<Self>(raw) {
            Ok(extraction) => extraction,
            Err(error) => {
                warn!(
                    event_name = "data.extraction.decode_failed",
                    error = %error,
                    "stored extraction payload is not valid json; using empty extraction"
                );
                Self::default()
            }
        }
    }

    /// Parses raw model output, tolerating markdown code fences around the JSON.
    pub fn from_model_output(text: &str) -> Self {
        let candidate = strip_code_fence(text);
        match serde_json::from_str::<Self>(candidate.trim()) {
            Ok(extraction) => extraction,
            Err(_) => Self {
                summary: Some(text.chars().take(200).collect()),
                ..Self::default()
            },
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_owned())
    }

    /// Positive amounts in key order.
    pub fn positive_amounts(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.amounts
            .iter()
            .filter(|(_, value)| **value > Decimal::ZERO)
            .map(|(key, value)| (key.as_str(), *value))
    }
}

/// `federal_withheld` -> `Federal Withheld`.
pub fn amount_label(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn unknown_doc_type() -> String {
    UNKNOWN_DOC_TYPE.to_owned()
}

fn strip_code_fence(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some((_, rest)) = text.split_once("```") {
        return rest.split("```").next().unwrap_or(rest);
    }
    text
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_doc_type<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_else(unknown_doc_type))
}

fn lenient_amounts<'de, D>(deserializer: D) -> Result<BTreeMap<String, Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(entries)) = value else {
        return Ok(BTreeMap::new());
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| {
            let amount = match value {
                Value::Number(number) => Decimal::from_str(&number.to_string()).ok(),
                Value::String(text) => {
                    Decimal::from_str(&text.trim().trim_start_matches('$').replace(',', "")).ok()
                }
                _ => None,
            }?;
            Some((key, amount))
        })
        .collect())
}
