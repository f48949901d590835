//! Index command - Build, rebuild or inspect the persisted semantic index

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use colored::Colorize;

use record_search::core::paths::IndexPaths;
use record_search::search::index::{detect_artifacts, ArtifactFamily};
use record_search::search::{IndexBuilder, IndexError, OutcomeKind, SemanticIndex, SharedIndex};

use super::Workspace;

/// Run index command
pub fn run(ws: &Workspace, status_only: bool, rebuild: bool, json: bool) -> Result<()> {
    let prefix = ws.index_prefix().to_path_buf();

    if status_only {
        return show_status(ws, &prefix, json);
    }

    let backend = ws.backend();
    if !json {
        println!(
            "{} Building search index from {} ({} backend)...",
            "→".dimmed(),
            ws.config.source.display(),
            backend.kind()
        );
    }

    let builder = IndexBuilder::new(backend);
    let shared = Arc::new(SharedIndex::new());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let start = std::time::Instant::now();
    let kind = runtime.block_on(async {
        let handle = shared.spawn_rebuild(builder, Arc::clone(&ws.source), prefix.clone(), rebuild)?;
        anyhow::Ok(handle.await??)
    })?;
    let duration_ms = start.elapsed().as_millis();
    let index = shared.snapshot();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "outcome": format!("{:?}", kind).to_lowercase(),
                "indexed": index.as_ref().map_or(0, |i| i.len()),
                "backend": index.as_ref().map(|i| i.backend().to_string()),
                "model": index.as_ref().and_then(|i| i.model().map(str::to_string)),
                "duration_ms": duration_ms,
            })
        );
        return Ok(());
    }

    println!();
    match (kind, index) {
        (OutcomeKind::Empty, _) | (_, None) => {
            println!(
                "{} No records found; semantic search is unavailable until data exists.",
                "!".yellow().bold()
            );
        }
        (OutcomeKind::Loaded, Some(index)) => {
            println!(
                "{} Index is up to date ({} records). Use {} to rebuild.",
                "✓".green().bold(),
                index.len().to_string().cyan(),
                "--rebuild".cyan()
            );
        }
        (OutcomeKind::Built, Some(index)) => {
            println!(
                "{} Indexed {} records in {:.2}s",
                "✓".green().bold(),
                index.len().to_string().cyan(),
                duration_ms as f64 / 1000.0
            );
            println!(
                "  {} Backend: {}{}",
                "→".dimmed(),
                index.backend(),
                index
                    .model()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default()
            );
            println!("  {} Index saved to: {}", "→".dimmed(), prefix.display());
        }
    }

    Ok(())
}

/// Show index status
fn show_status(ws: &Workspace, prefix: &Path, json: bool) -> Result<()> {
    let family = match detect_artifacts(prefix) {
        Ok(family) => family,
        Err(IndexError::NotFound(_)) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "exists": false,
                        "error": "Index not found"
                    })
                );
            } else {
                println!(
                    "{} Index not found. Run {} first.",
                    "!".yellow().bold(),
                    "recsearch index".cyan()
                );
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let paths = IndexPaths::from_prefix(prefix);
    let files: Vec<&Path> = match family {
        ArtifactFamily::Dense => paths.dense_artifacts().into_iter().map(|p| p.as_path()).collect(),
        ArtifactFamily::Sparse => vec![paths.sparse.as_path()],
    };
    let file_size: u64 = files
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();
    let modified = files
        .iter()
        .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
        .max()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string());

    let loaded = SemanticIndex::load(prefix, &ws.backend());

    if json {
        let mut status = serde_json::json!({
            "exists": true,
            "family": format!("{:?}", family).to_lowercase(),
            "file_size_bytes": file_size,
            "last_indexed": modified,
        });
        match &loaded {
            Ok(index) => {
                status["record_count"] = index.len().into();
                status["backend"] = index.backend().to_string().into();
                status["model"] = index.model().into();
            }
            Err(e) => status["error"] = e.to_string().into(),
        }
        println!("{}", status);
        return Ok(());
    }

    println!("{}", "Index Status".bold());
    println!();
    match &loaded {
        Ok(index) => {
            println!(
                "  {} {} records indexed",
                "→".dimmed(),
                index.len().to_string().cyan()
            );
            println!("  {} Backend: {}", "→".dimmed(), index.backend());
            if let Some(model) = index.model() {
                println!("  {} Model: {}", "→".dimmed(), model);
            }
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), e);
            println!(
                "  {} Run {} to rebuild.",
                "→".dimmed(),
                "recsearch index --rebuild".cyan()
            );
        }
    }
    println!(
        "  {} Size: {:.2} KB",
        "→".dimmed(),
        file_size as f64 / 1024.0
    );
    if let Some(ts) = modified {
        println!("  {} Last indexed: {}", "→".dimmed(), ts);
    }

    Ok(())
}
