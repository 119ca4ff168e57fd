//! # Knowledge Engine CLI (`kbe`)
//!
//! Command-line front end for knowledge-base ingestion and retrieval.
//!
//! ## Usage
//!
//! ```bash
//! kbe --config ./config/kbe.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbe init` | Create the SQLite database and run schema migrations |
//! | `kbe kb create <name>` | Create a knowledge base |
//! | `kbe kb list` | List knowledge bases of a workspace, newest first |
//! | `kbe kb show <id>` | Show a knowledge base with document and chunk counts |
//! | `kbe ingest <kb> <file>` | Ingest a text file as a new document |
//! | `kbe reingest <doc> <file>` | Replace a document's content |
//! | `kbe docs <kb>` | List documents of a knowledge base |
//! | `kbe get <doc>` | Print a document and its chunks |
//! | `kbe search <kb> "<query>"` | Ranked retrieval, printed as JSON |
//!
//! Logs go to stderr. `RUST_LOG` overrides `--log-level`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use knowledge_engine::commands::{self, parse_key_val};
use knowledge_engine::config;
use knowledge_engine::engine::KnowledgeEngine;

/// Knowledge Engine CLI: ingest documents into knowledge bases and retrieve
/// the most relevant chunks.
#[derive(Parser)]
#[command(
    name = "kbe",
    about = "Knowledge Engine: chunked document ingestion and ranked retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbe.toml")]
    config: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Ingest a text file as a new document.
    Ingest {
        /// Knowledge base id.
        kb: String,

        /// UTF-8 text file to ingest.
        file: PathBuf,

        /// Document name. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Extra document metadata as KEY=VALUE (repeatable).
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, Value)>,
    },

    /// Replace a document's content and re-chunk it.
    Reingest {
        /// Document id.
        doc: String,

        /// UTF-8 text file with the new content.
        file: PathBuf,

        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, Value)>,
    },

    /// List documents of a knowledge base, newest first.
    Docs {
        kb: String,
    },

    /// Print a document and its chunks.
    Get {
        /// Document id.
        id: String,
    },

    /// Retrieve the highest-scoring chunks for a query.
    Search {
        /// Knowledge base id.
        kb: String,

        query: String,

        /// Maximum number of results (clamped to `retrieval.max_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Metadata filter as KEY=VALUE (repeatable, all must match).
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, Value)>,
    },
}

#[derive(Subcommand)]
enum KbAction {
    Create {
        name: String,

        #[arg(long, default_value = "default")]
        workspace: String,

        #[arg(long)]
        description: Option<String>,
    },
    List {
        #[arg(long, default_value = "default")]
        workspace: String,
    },
    Show {
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;
    let engine = KnowledgeEngine::open(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
        }
        Commands::Kb { action } => match action {
            KbAction::Create {
                name,
                workspace,
                description,
            } => {
                commands::run_kb_create(&engine, &workspace, &name, description.as_deref())
                    .await?;
            }
            KbAction::List { workspace } => {
                commands::run_kb_list(&engine, &workspace).await?;
            }
            KbAction::Show { id } => {
                commands::run_kb_show(&engine, &id).await?;
            }
        },
        Commands::Ingest {
            kb,
            file,
            name,
            meta,
        } => {
            commands::run_ingest(&engine, &kb, &file, name.as_deref(), meta).await?;
        }
        Commands::Reingest { doc, file, meta } => {
            commands::run_reingest(&engine, &doc, &file, meta).await?;
        }
        Commands::Docs { kb } => {
            commands::run_docs(&engine, &kb).await?;
        }
        Commands::Get { id } => {
            commands::run_get(&engine, &id).await?;
        }
        Commands::Search {
            kb,
            query,
            limit,
            filters,
        } => {
            commands::run_search(&engine, &kb, &query, limit, filters).await?;
        }
    }

    engine.store().pool().close().await;
    Ok(())
}
