//! Corpus building: one retrievable text blob per record
//!
//! Blobs look like `am_id: 123 | am_name: 250-3航爆弹 | country: 中国`.
//! Every non-binary field with a value takes part, in manifest order.

use crate::core::record::{FieldManifest, FieldValue};

pub const FIELD_SEPARATOR: &str = " | ";
/// Visible separator between list items
pub const LIST_SEPARATOR: &str = "、";
/// Stand-in for blank blobs so vectorizers never see an empty row
pub const EMPTY_PLACEHOLDER: &str = "NA";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Id-like field names, tried in order for the fallback blob
const ID_FIELDS: &[&str] = &["am_id", "id", "AMID", "AmID"];
/// Name-like field names, tried in order for the fallback blob
const NAME_FIELDS: &[&str] = &[
    "am_name",
    "official_name",
    "chinese_name",
    "name",
    "AMName",
    "runway_name",
    "shelter_name",
    "ucc_name",
];

/// `(id, text)` pair fed to the vectorizer; `text` is never blank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub id: i64,
    pub text: String,
}

impl CorpusEntry {
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        let text = if trimmed.is_empty() {
            EMPTY_PLACEHOLDER.to_string()
        } else {
            trimmed.to_string()
        };
        Self { id, text }
    }
}

/// Render a field value as plain text
///
/// Numbers never use exponent notation; `Bytes` render as nothing.
pub fn value_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Null | FieldValue::Bytes(_) => String::new(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Decimal(d) => plain_decimal(d),
        FieldValue::Text(s) => s.clone(),
        FieldValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        FieldValue::List(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        FieldValue::Map(map) => serde_json::to_string(map).unwrap_or_default(),
    }
}

/// Decimal strings in exponent form (`1E+2`) are expanded
fn plain_decimal(d: &str) -> String {
    let d = d.trim();
    if d.contains(['e', 'E']) {
        if let Ok(v) = d.parse::<f64>() {
            return v.to_string();
        }
    }
    d.to_string()
}

/// Zero and `false` are values; only null and blank text are empty
fn is_empty_value(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Flatten one record into its corpus blob
pub fn build_blob<R: FieldManifest + ?Sized>(record: &R) -> String {
    let names = record.field_names();
    let mut parts = Vec::with_capacity(names.len());

    for name in &names {
        if record.is_binary(name) {
            continue;
        }
        let Some(value) = record.field_value(name) else {
            continue;
        };
        if value.is_bytes() || is_empty_value(&value) {
            continue;
        }
        let text = value_text(&value);
        if !text.is_empty() {
            parts.push(format!("{name}: {text}"));
        }
    }

    if parts.is_empty() {
        parts = fallback_parts(record, &names);
    }
    if parts.is_empty() {
        return record.display_fallback();
    }
    parts.join(FIELD_SEPARATOR)
}

fn fallback_parts<R: FieldManifest + ?Sized>(record: &R, names: &[&str]) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(id_field) = ID_FIELDS.iter().copied().find(|f| names.contains(f)) {
        parts.push(format!("{id_field}: {}", record.record_id()));
    }

    let name_part = NAME_FIELDS
        .iter()
        .copied()
        .filter(|f| names.contains(f) && !record.is_binary(f))
        .find_map(|f| {
            let text = record.field_value(f).map(|v| value_text(&v))?;
            let text = text.trim();
            (!text.is_empty()).then(|| format!("{f}: {text}"))
        });
    parts.extend(name_part);

    parts
}

/// Corpus for a whole snapshot, in record order
pub fn build_corpus<R: FieldManifest>(records: &[R]) -> Vec<CorpusEntry> {
    records
        .iter()
        .map(|r| CorpusEntry::new(r.record_id(), build_blob(r)))
        .collect()
}
