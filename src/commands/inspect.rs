//! Inspect command - Show a record's fields and its corpus blob

use anyhow::{bail, Result};
use colored::Colorize;

use record_search::core::record::FieldValue;
use record_search::search::corpus::{build_blob, value_text};

use super::Workspace;

/// Run inspect command
pub fn run(ws: &Workspace, id: i64, json: bool) -> Result<()> {
    let Some(record) = ws.source.fetch(&[id])?.into_iter().next() else {
        if json {
            println!("{}", serde_json::json!({ "id": id, "error": "Record not found" }));
            return Ok(());
        }
        bail!("Record {} not found in {}", id, ws.config.source.display());
    };

    let blob = build_blob(&record);

    if json {
        let fields: serde_json::Map<String, serde_json::Value> = record
            .fields
            .iter()
            .map(|f| {
                let value = if f.binary || f.value.is_bytes() {
                    serde_json::json!({ "binary": true })
                } else {
                    serde_json::Value::String(value_text(&f.value))
                };
                (f.name.clone(), value)
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "id": record.id,
                "fields": fields,
                "blob": blob,
            }))?
        );
        return Ok(());
    }

    println!("{} {}", "Record".bold(), format!("#{}", record.id).cyan());
    println!();
    for field in &record.fields {
        let shown = match &field.value {
            _ if field.binary => "<binary, excluded>".dimmed().to_string(),
            FieldValue::Bytes(b) => format!("<{} bytes, excluded>", b.len()).dimmed().to_string(),
            FieldValue::Null => "null".dimmed().to_string(),
            value => value_text(value),
        };
        println!("  {} {}: {}", "→".dimmed(), field.name, shown);
    }
    println!();
    println!("{}", "Corpus blob".bold());
    println!("  {}", blob);

    Ok(())
}
