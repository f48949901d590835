//! Search command - Semantic search with optional structured conditions

use anyhow::{anyhow, Result};
use colored::Colorize;

use record_search::core::filter::{Clause, Condition, StructuredFilter};
use record_search::core::sqlite::SqlFilter;
use record_search::search::{build_blob, HybridRetriever, IndexBuilder, IndexError, SharedIndex};

use super::{truncate_columns, Workspace};

/// Columns of blob text shown under each hit
const SNIPPET_COLUMNS: usize = 100;

/// Condition flags as given on the command line
#[derive(Debug, Default)]
pub struct ConditionArgs {
    pub equals: Vec<String>,
    pub contains: Vec<String>,
    pub ranges: Vec<String>,
}

impl ConditionArgs {
    pub fn to_condition(&self) -> Result<Condition> {
        let mut condition = Condition::new();
        for spec in &self.equals {
            condition = condition.and(Clause::parse_eq(spec).map_err(|e| anyhow!(e))?);
        }
        for spec in &self.contains {
            condition = condition.and(Clause::parse_contains(spec).map_err(|e| anyhow!(e))?);
        }
        for spec in &self.ranges {
            condition = condition.and(Clause::parse_range(spec).map_err(|e| anyhow!(e))?);
        }
        Ok(condition)
    }
}

/// Run search command
pub fn run(
    ws: &Workspace,
    query: &str,
    limit: Option<usize>,
    conditions: &ConditionArgs,
    json: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(ws.config.default_limit);
    let condition = conditions.to_condition()?;

    // Load the persisted index, or build it on first use
    let builder = IndexBuilder::new(ws.backend());
    let shared = SharedIndex::new();
    shared.refresh(&builder, ws.source.as_ref(), ws.index_prefix(), false)?;

    let Some(index) = shared.snapshot() else {
        let err = IndexError::NotReady;
        if json {
            println!("{}", serde_json::json!({ "error": err.to_string() }));
        } else {
            println!(
                "{} {} (the record source is empty)",
                "!".yellow().bold(),
                err
            );
        }
        return Ok(());
    };

    let sql_filter = match (&ws.sqlite, condition.is_empty()) {
        (Some(sqlite), false) => Some(SqlFilter::new(sqlite, condition.clone())),
        _ => None,
    };
    let filter: Option<&dyn StructuredFilter> = match (&sql_filter, condition.is_empty()) {
        (Some(sql), _) => Some(sql as &dyn StructuredFilter),
        (None, false) => Some(&condition as &dyn StructuredFilter),
        (None, true) => None,
    };

    let retriever =
        HybridRetriever::new(ws.source.as_ref()).with_recall_multiplier(ws.config.recall_multiplier);
    let results = retriever.query_scored(&index, query, filter, limit)?;

    if json {
        let json_results: Vec<_> = results
            .iter()
            .map(|(record, score)| {
                serde_json::json!({
                    "id": record.id,
                    "score": score,
                    "text": build_blob(record),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!(
        "{} {} results for: {} ({} backend)",
        "→".dimmed(),
        results.len(),
        query.cyan(),
        index.backend()
    );
    if !condition.is_empty() {
        println!(
            "  {} {} condition(s) applied",
            "→".dimmed(),
            condition.clauses.len()
        );
    }
    println!();

    for (i, (record, score)) in results.iter().enumerate() {
        let score_str = format!("{:.2}", score);
        let score_colored = if *score > 0.8 {
            score_str.green()
        } else if *score > 0.6 {
            score_str.yellow()
        } else {
            score_str.dimmed()
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            score_colored,
            format!("#{}", record.id).cyan()
        );
        println!(
            "   {}",
            truncate_columns(&build_blob(record), SNIPPET_COLUMNS).dimmed()
        );
        println!();
    }

    Ok(())
}
