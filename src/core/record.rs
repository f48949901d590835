//! Structured records as seen by the retrieval engine
//!
//! The engine never reflects over caller types. Each record type declares
//! its fields through [`FieldManifest`], and [`Record`] is the generic,
//! owned form produced by the built-in record sources.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Value of a single record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Exact decimal kept in its plain textual form (e.g. `"250.50"`)
    Decimal(String),
    Text(String),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    List(Vec<FieldValue>),
    Map(serde_json::Map<String, serde_json::Value>),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }

    /// Numeric view used by range conditions
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Decimal(d) => d.trim().parse().ok(),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Convert an untyped JSON value (record files, SQLite JSON columns)
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => parse_temporal(&s).unwrap_or(Self::Text(s)),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(map),
        }
    }
}

/// Recognise ISO-8601-ish timestamps and dates in text values
fn parse_temporal(s: &str) -> Option<FieldValue> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    let trimmed = s.trim();
    if trimmed.len() < 10 {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(FieldValue::DateTime(dt));
        }
    }
    if trimmed.len() == 10 {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Some(FieldValue::Date(d));
        }
    }
    None
}

/// One named field with its declared binary flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    /// Declared as a binary column (image, blob), regardless of current value
    #[serde(default)]
    pub binary: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            binary: false,
        }
    }

    pub fn binary(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            binary: true,
        }
    }
}

/// Declared field manifest of a record type
///
/// Implemented once per record type. `field_names` must be stable across
/// calls so corpus blobs are reproducible.
pub trait FieldManifest {
    /// Native identifier of the record
    fn record_id(&self) -> i64;

    /// Every declared field, in declaration order
    fn field_names(&self) -> Vec<&str>;

    /// Current value of a field, `None` for unknown names
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    /// Declared binary fields are never indexed
    fn is_binary(&self, field: &str) -> bool;

    /// Last-resort textual form when no field yields text
    fn display_fallback(&self) -> String;
}

/// Generic owned record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.push(Field::new(name, value));
        self
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, FieldValue::Text(value.into()))
    }

    /// Replaces an existing field of the same name, keeping its position
    pub fn push(&mut self, field: Field) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Build a record from a JSON object, taking the id from `id_field`
    pub fn from_json_object(
        object: serde_json::Map<String, serde_json::Value>,
        id_field: &str,
    ) -> Option<Self> {
        let id = match object.get(id_field)? {
            serde_json::Value::Number(n) => n.as_i64()?,
            serde_json::Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };

        // Binary payloads arrive as {"$bytes": [..]}
        let mut record = Self::new(id);
        for (name, value) in object {
            let field = match value {
                serde_json::Value::Object(ref inner) if inner.contains_key("$bytes") => {
                    let bytes = inner
                        .get("$bytes")
                        .and_then(|b| b.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_u64().map(|b| b as u8))
                                .collect()
                        })
                        .unwrap_or_default();
                    Field::binary(name, FieldValue::Bytes(bytes))
                }
                other => Field::new(name, FieldValue::from_json(other)),
            };
            record.push(field);
        }
        Some(record)
    }
}

impl FieldManifest for Record {
    fn record_id(&self) -> i64 {
        self.id
    }

    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn field_value(&self, field: &str) -> Option<FieldValue> {
        self.get(field).cloned()
    }

    fn is_binary(&self, field: &str) -> bool {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.binary || f.value.is_bytes())
            .unwrap_or(false)
    }

    fn display_fallback(&self) -> String {
        format!("Record(id={})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_object() {
        let obj = json!({
            "id": 7,
            "am_name": "250-3",
            "weight": 250.5,
            "created_time": "2024-03-01 08:30:00",
            "picture": {"$bytes": [1, 2, 3]}
        });
        let record = Record::from_json_object(obj.as_object().unwrap().clone(), "id").unwrap();

        assert_eq!(record.id, 7);
        assert_eq!(record.get("weight"), Some(&FieldValue::Float(250.5)));
        assert!(matches!(
            record.get("created_time"),
            Some(FieldValue::DateTime(_))
        ));
        assert!(record.is_binary("picture"));
        assert!(!record.is_binary("am_name"));
    }

    #[test]
    fn test_string_id_is_parsed() {
        let obj = json!({"am_id": "42", "country": "中国"});
        let record = Record::from_json_object(obj.as_object().unwrap().clone(), "am_id").unwrap();
        assert_eq!(record.id, 42);
    }

    #[test]
    fn test_missing_id_rejected() {
        let obj = json!({"country": "中国"});
        assert!(Record::from_json_object(obj.as_object().unwrap().clone(), "id").is_none());
    }

    #[test]
    fn test_push_replaces_in_place() {
        let mut record = Record::new(1).with_text("a", "x").with_text("b", "y");
        record.push(Field::new("a", FieldValue::Integer(3)));
        assert_eq!(record.field_names(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(FieldValue::Decimal("12.50".into()).as_f64(), Some(12.5));
        assert_eq!(FieldValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Text("abc".into()).as_f64(), None);
    }
}
