mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::search::ConditionArgs;
use commands::Workspace;

#[derive(Parser)]
#[command(name = "recsearch")]
#[command(about = "Hybrid semantic search over structured records", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: ./recsearch.yaml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Record source: data directory or SQLite file")]
    source: Option<PathBuf>,
    #[arg(long, global = true, help = "Table to read from a SQLite source")]
    table: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build semantic search index
    Index {
        #[arg(long, help = "Show index status only")]
        status: bool,
        #[arg(long, help = "Force rebuild index")]
        rebuild: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Semantic search, optionally narrowed by field conditions
    #[command(alias = "s")]
    Search {
        query: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long = "where", value_name = "FIELD=VALUE", help = "Exact match condition")]
        equals: Vec<String>,
        #[arg(long, value_name = "FIELD=TEXT", help = "Substring condition")]
        contains: Vec<String>,
        #[arg(long = "range", value_name = "FIELD=MIN..MAX", help = "Numeric range condition")]
        ranges: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show a record's fields and corpus text
    Inspect {
        id: i64,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let ws = Workspace::open(cli.config.as_deref(), cli.source, cli.table)?;

    match cli.command {
        Commands::Index {
            status,
            rebuild,
            json,
        } => commands::index::run(&ws, status, rebuild, json),
        Commands::Search {
            query,
            limit,
            equals,
            contains,
            ranges,
            json,
        } => {
            let conditions = ConditionArgs {
                equals,
                contains,
                ranges,
            };
            commands::search::run(&ws, &query, limit, &conditions, json)
        }
        Commands::Inspect { id, json } => commands::inspect::run(&ws, id, json),
    }
}
