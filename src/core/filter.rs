//! Structured filters applied to resolved records
//!
//! A [`Condition`] is the combination-search form: a conjunction of
//! equality, substring and numeric-range clauses. It can run in memory
//! against resolved records or be rendered as a SQL `WHERE` clause.

use serde::{Deserialize, Serialize};

use super::record::{FieldValue, Record};
use super::source::SourceError;
use crate::search::corpus::value_text;

/// Narrows a list of resolved records
///
/// Implementations only remove records; the relative order of the
/// survivors must match the input.
pub trait StructuredFilter: Send + Sync {
    fn retain(&self, records: Vec<Record>) -> Result<Vec<Record>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Clause {
    /// Exact match; numeric when both sides parse as numbers
    Eq { field: String, value: String },
    /// Case-insensitive substring
    Contains { field: String, text: String },
    /// Inclusive numeric range, either bound optional
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl Clause {
    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. } | Self::Contains { field, .. } | Self::Range { field, .. } => {
                field
            }
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(self.field()) else {
            return false;
        };
        if matches!(value, FieldValue::Null | FieldValue::Bytes(_)) {
            return false;
        }

        match self {
            Self::Eq { value: wanted, .. } => {
                let wanted = wanted.trim();
                match (value.as_f64(), wanted.parse::<f64>().ok()) {
                    (Some(have), Some(want)) => (have - want).abs() < 1e-9,
                    _ => value_text(value).trim() == wanted,
                }
            }
            Self::Contains { text, .. } => value_text(value)
                .to_lowercase()
                .contains(&text.to_lowercase()),
            Self::Range { min, max, .. } => match value.as_f64() {
                Some(v) => min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi),
                None => false,
            },
        }
    }

    /// Parse `field=value`
    pub fn parse_eq(spec: &str) -> Result<Self, String> {
        let (field, value) = split_pair(spec)?;
        Ok(Self::Eq {
            field,
            value: value.to_string(),
        })
    }

    /// Parse `field=text`
    pub fn parse_contains(spec: &str) -> Result<Self, String> {
        let (field, text) = split_pair(spec)?;
        Ok(Self::Contains {
            field,
            text: text.to_string(),
        })
    }

    /// Parse `field=min..max`; either bound may be omitted
    pub fn parse_range(spec: &str) -> Result<Self, String> {
        let (field, bounds) = split_pair(spec)?;
        let (lo, hi) = bounds
            .split_once("..")
            .ok_or_else(|| format!("range must look like min..max, got '{bounds}'"))?;
        let parse_bound = |b: &str| -> Result<Option<f64>, String> {
            let b = b.trim();
            if b.is_empty() {
                Ok(None)
            } else {
                b.parse()
                    .map(Some)
                    .map_err(|_| format!("'{b}' is not a number"))
            }
        };
        let (min, max) = (parse_bound(lo)?, parse_bound(hi)?);
        if min.is_none() && max.is_none() {
            return Err(format!("range for '{field}' has no bounds"));
        }
        Ok(Self::Range { field, min, max })
    }
}

fn split_pair(spec: &str) -> Result<(String, &str), String> {
    let (field, rest) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{spec}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{spec}'"));
    }
    Ok((field.to_string(), rest))
}

/// Conjunction of clauses; the empty condition matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub clauses: Vec<Clause>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }
}

impl StructuredFilter for Condition {
    fn retain(&self, records: Vec<Record>) -> Result<Vec<Record>, SourceError> {
        Ok(records.into_iter().filter(|r| self.matches(r)).collect())
    }
}

/// Adapts a plain predicate into a filter
pub struct PredicateFilter<F>(pub F);

impl<F> StructuredFilter for PredicateFilter<F>
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn retain(&self, records: Vec<Record>) -> Result<Vec<Record>, SourceError> {
        Ok(records.into_iter().filter(|r| (self.0)(r)).collect())
    }
}
