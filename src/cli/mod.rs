use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod mcp;

/// Local hybrid (vector + BM25) retrieval over a source tree and its database schema
#[derive(Parser, Debug)]
#[command(name = "semindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project manifest (defaults to <root>/semindex.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root (defaults to current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the index from scratch
    Init {
        /// Report files, chunks and estimated embedding cost without indexing
        #[arg(long)]
        dry_run: bool,

        /// Rebuild even if an index already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Update the index with changes since the last refresh
    Refresh {
        /// Rebuild everything instead of only changed files
        #[arg(long)]
        full: bool,

        /// Refresh exactly these paths instead of asking git
        #[arg(long, num_args = 1..)]
        files: Vec<String>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Search code, docs and schema using natural language
    Search {
        /// Search query (e.g., "where do we validate sessions?")
        query: String,

        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Weight of the vector signal (0 = keyword only, 1 = vector only)
        #[arg(long)]
        weight: Option<f32>,

        /// Restrict to one content type (code, schema, config, docs)
        #[arg(long = "type")]
        content_type: Option<String>,

        /// Restrict to languages (repeatable)
        #[arg(long = "lang")]
        languages: Vec<String>,

        /// Restrict to paths matching a glob (repeatable)
        #[arg(long = "path")]
        paths: Vec<String>,

        /// Restrict to one collection (codebase, database, all)
        #[arg(long, default_value = "all")]
        scope: String,

        /// Rerank the fused candidates with the neural reranker
        #[arg(long)]
        rerank: bool,

        /// Show full chunk content instead of snippets
        #[arg(short, long)]
        content: bool,

        /// Output JSON in the query tool format
        #[arg(long)]
        json: bool,
    },

    /// Show counts, freshness and storage size
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,

    /// Start an MCP server on stdio exposing the query tool
    Mcp,
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.quiet {
        crate::output::set_quiet(true);
    }

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize().unwrap_or(root);
    let config = crate::config::Config::load(&root, cli.config.as_deref())?;

    match cli.command {
        Commands::Init { dry_run, force } => commands::init(root, config, dry_run, force).await,
        Commands::Refresh { full, files, json } => {
            if json {
                crate::output::set_quiet(true);
            }
            commands::refresh(root, config, full, files, json).await
        }
        Commands::Search {
            query,
            top_k,
            weight,
            content_type,
            languages,
            paths,
            scope,
            rerank,
            content,
            json,
        } => {
            // Auto-enable quiet mode for JSON output
            if json {
                crate::output::set_quiet(true);
            }
            let args = commands::SearchArgs {
                query,
                top_k,
                weight,
                content_type,
                languages,
                paths,
                scope,
                rerank,
                content,
                json,
            };
            commands::search(root, config, args).await
        }
        Commands::Status { json } => commands::status(root, config, json).await,
        Commands::Config => commands::show_config(&config),
        Commands::Mcp => {
            crate::output::set_quiet(true);
            mcp::run_mcp_server(root, config).await
        }
    }
}
