//! SQLite-backed record source
//!
//! Each table row becomes a [`Record`]. Columns whose declared type names
//! a binary storage class (`BLOB`, `BINARY`, `VARBINARY`, ...) are flagged
//! binary so they never reach the corpus.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};

use super::filter::{Clause, Condition, StructuredFilter};
use super::record::{Field, FieldValue, Record};
use super::source::{RecordSource, SourceError};

/// SQLite variable limit is 999 on older builds
const FETCH_CHUNK: usize = 500;

#[derive(Debug, Clone)]
struct Column {
    name: String,
    decl_type: String,
}

impl Column {
    fn is_binary(&self) -> bool {
        let t = self.decl_type.to_ascii_uppercase();
        t.contains("BLOB") || t.contains("BINARY")
    }

    fn is_decimal(&self) -> bool {
        let t = self.decl_type.to_ascii_uppercase();
        t.contains("DECIMAL") || t.contains("NUMERIC")
    }
}

/// Rows of one table in a SQLite database
pub struct SqliteRecordSource {
    path: PathBuf,
    table: String,
    id_field: String,
}

impl SqliteRecordSource {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
            id_field: id_field.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Io {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "database missing"),
            });
        }
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }

    fn columns(&self, conn: &Connection) -> Result<Vec<Column>, SourceError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&self.table)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(Column {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(SourceError::InvalidRecord {
                origin: self.origin(),
                reason: format!("table '{}' not found", self.table),
            });
        }
        if !columns.iter().any(|c| c.name == self.id_field) {
            return Err(SourceError::InvalidRecord {
                origin: self.origin(),
                reason: format!("id column '{}' not found", self.id_field),
            });
        }
        Ok(columns)
    }

    fn origin(&self) -> String {
        format!("{}:{}", self.path.display(), self.table)
    }

    fn select_clause(&self, columns: &[Column]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        format!("SELECT {} FROM {}", cols.join(", "), quote_ident(&self.table))
    }

    fn row_to_record(&self, row: &Row<'_>, columns: &[Column]) -> Result<Record, SourceError> {
        let mut id = None;
        let mut fields = Vec::with_capacity(columns.len());

        for (i, column) in columns.iter().enumerate() {
            let value = to_field_value(row.get_ref(i)?, column);
            if column.name == self.id_field {
                id = match &value {
                    FieldValue::Integer(v) => Some(*v),
                    FieldValue::Text(s) => s.trim().parse().ok(),
                    _ => None,
                };
            }
            fields.push(Field {
                name: column.name.clone(),
                binary: column.is_binary() || value.is_bytes(),
                value,
            });
        }

        let id = id.ok_or_else(|| SourceError::InvalidRecord {
            origin: self.origin(),
            reason: format!("row without integer '{}'", self.id_field),
        })?;
        Ok(Record { id, fields })
    }

    fn query_records(
        &self,
        conn: &Connection,
        columns: &[Column],
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Record>, SourceError> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(self.row_to_record(row, columns)?);
        }
        Ok(records)
    }

    /// Ids of every row satisfying the condition, evaluated in SQL
    pub fn matching_ids(&self, condition: &Condition) -> Result<HashSet<i64>, SourceError> {
        let conn = self.open()?;
        self.columns(&conn)?;

        let (where_sql, params) = condition_to_sql(condition);
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            quote_ident(&self.id_field),
            quote_ident(&self.table),
            where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }
}

impl RecordSource for SqliteRecordSource {
    fn list_all(&self) -> Result<Vec<Record>, SourceError> {
        let conn = self.open()?;
        let columns = self.columns(&conn)?;
        let sql = format!(
            "{} ORDER BY {}",
            self.select_clause(&columns),
            quote_ident(&self.id_field)
        );
        self.query_records(&conn, &columns, &sql, &[])
    }

    fn fetch(&self, ids: &[i64]) -> Result<Vec<Record>, SourceError> {
        let conn = self.open()?;
        let columns = self.columns(&conn)?;
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "{} WHERE {} IN ({})",
                self.select_clause(&columns),
                quote_ident(&self.id_field),
                placeholders
            );
            let params: Vec<Value> = chunk.iter().map(|id| Value::Integer(*id)).collect();
            records.extend(self.query_records(&conn, &columns, &sql, &params)?);
        }
        Ok(records)
    }
}

/// Runs a [`Condition`] in SQL and keeps candidates whose id matched
pub struct SqlFilter<'a> {
    source: &'a SqliteRecordSource,
    condition: Condition,
}

impl<'a> SqlFilter<'a> {
    pub fn new(source: &'a SqliteRecordSource, condition: Condition) -> Self {
        Self { source, condition }
    }
}

impl StructuredFilter for SqlFilter<'_> {
    fn retain(&self, records: Vec<Record>) -> Result<Vec<Record>, SourceError> {
        let ids = self.source.matching_ids(&self.condition)?;
        Ok(records.into_iter().filter(|r| ids.contains(&r.id)).collect())
    }
}

fn to_field_value(value: ValueRef<'_>, column: &Column) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Integer(i),
        ValueRef::Real(f) if column.is_decimal() => FieldValue::Decimal(f.to_string()),
        ValueRef::Real(f) => FieldValue::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if column.is_decimal() && text.trim().parse::<f64>().is_ok() {
                FieldValue::Decimal(text.trim().to_string())
            } else {
                FieldValue::from_json(serde_json::Value::String(text))
            }
        }
        ValueRef::Blob(bytes) => FieldValue::Bytes(bytes.to_vec()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Render a condition as a `WHERE` body plus its bound parameters
///
/// Numeric equality and ranges only consider integer/real cells; text
/// cells holding numbers compare as text.
fn condition_to_sql(condition: &Condition) -> (String, Vec<Value>) {
    if condition.is_empty() {
        return ("1 = 1".to_string(), Vec::new());
    }

    let mut parts = Vec::with_capacity(condition.clauses.len());
    let mut params = Vec::new();

    for clause in &condition.clauses {
        let col = quote_ident(clause.field());
        match clause {
            Clause::Eq { value, .. } => {
                let value = value.trim();
                match value.parse::<f64>() {
                    Ok(num) => {
                        parts.push(format!(
                            "((typeof({col}) IN ('integer', 'real') AND {col} = ?) OR TRIM({col}) = ?)"
                        ));
                        params.push(Value::Real(num));
                        params.push(Value::Text(value.to_string()));
                    }
                    Err(_) => {
                        parts.push(format!("TRIM({col}) = ?"));
                        params.push(Value::Text(value.to_string()));
                    }
                }
            }
            Clause::Contains { text, .. } => {
                parts.push(format!("LOWER(CAST({col} AS TEXT)) LIKE ? ESCAPE '\\'"));
                params.push(Value::Text(format!("%{}%", escape_like(&text.to_lowercase()))));
            }
            Clause::Range { min, max, .. } => {
                let mut range = vec![format!("typeof({col}) IN ('integer', 'real')")];
                if let Some(lo) = min {
                    range.push(format!("{col} >= ?"));
                    params.push(Value::Real(*lo));
                }
                if let Some(hi) = max {
                    range.push(format!("{col} <= ?"));
                    params.push(Value::Real(*hi));
                }
                parts.push(format!("({})", range.join(" AND ")));
            }
        }
    }

    (parts.join(" AND "), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, SqliteRecordSource) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("targets.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE ammunition (
                am_id INTEGER PRIMARY KEY,
                am_name TEXT NOT NULL,
                country TEXT,
                weight REAL,
                price DECIMAL(10, 2),
                am_picture BLOB,
                created_time DATETIME
            );
            INSERT INTO ammunition VALUES (1, '250-3航爆弹', '中国', 250.0, '12.50', x'0102', '2024-01-02 03:04:05');
            INSERT INTO ammunition VALUES (2, 'GBU-31', '美国', 925.0, NULL, NULL, NULL);
            INSERT INTO ammunition VALUES (3, 'KAB-500', '俄罗斯', 500.0, NULL, NULL, NULL);
            "#,
        )
        .unwrap();
        drop(conn);
        let source = SqliteRecordSource::new(path, "ammunition", "am_id");
        (dir, source)
    }

    #[test]
    fn test_list_all_flags_binary_columns() {
        let (_dir, source) = fixture();
        let records = source.list_all().unwrap();

        assert_eq!(records.len(), 3);
        let first = &records[0];
        assert_eq!(first.id, 1);
        assert!(first.fields.iter().any(|f| f.name == "am_picture" && f.binary));
        // NUMERIC affinity stores '12.50' as REAL
        assert_eq!(first.get("price"), Some(&FieldValue::Decimal("12.5".into())));
        assert!(matches!(first.get("created_time"), Some(FieldValue::DateTime(_))));
        // NULL blob is still declared binary
        assert!(records[1].fields.iter().any(|f| f.name == "am_picture" && f.binary));
    }

    #[test]
    fn test_fetch_by_ids() {
        let (_dir, source) = fixture();
        let mut ids: Vec<i64> = source.fetch(&[3, 1, 42]).unwrap().iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_matching_ids() {
        let (_dir, source) = fixture();

        let cond = Condition::new().and(Clause::parse_range("weight=300..1000").unwrap());
        let ids = source.matching_ids(&cond).unwrap();
        assert_eq!(ids, HashSet::from([2, 3]));

        let cond = Condition::new()
            .and(Clause::parse_contains("am_name=gbu").unwrap())
            .and(Clause::parse_eq("country=美国").unwrap());
        assert_eq!(source.matching_ids(&cond).unwrap(), HashSet::from([2]));

        let cond = Condition::new().and(Clause::parse_eq("weight=250").unwrap());
        assert_eq!(source.matching_ids(&cond).unwrap(), HashSet::from([1]));
    }

    #[test]
    fn test_sql_filter_preserves_order() {
        let (_dir, source) = fixture();
        let mut records = source.fetch(&[1, 2, 3]).unwrap();
        records.sort_by_key(|r| r.id);
        let ordered = vec![records[2].clone(), records[0].clone(), records[1].clone()];

        let filter = SqlFilter::new(
            &source,
            Condition::new().and(Clause::parse_range("weight=..600").unwrap()),
        );
        let kept: Vec<i64> = filter.retain(ordered).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(kept, vec![3, 1]);
    }

    #[test]
    fn test_unknown_table() {
        let (_dir, source) = fixture();
        let bad = SqliteRecordSource::new(source.path(), "runway", "id");
        assert!(matches!(bad.list_all(), Err(SourceError::InvalidRecord { .. })));
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
