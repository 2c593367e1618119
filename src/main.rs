mod cli;
mod server;
mod tools;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemo::config::MnemoConfig;

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Retrieval-and-decay memory engine for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport)
    Serve,
    /// Recall concepts for a query, or everything known about an entity
    Recall {
        /// Natural-language query (optional with --entity)
        query: Option<String>,
        /// Number of concepts to return (default: retrieval.default_k)
        #[arg(short, long)]
        k: Option<usize>,
        /// Entity id (`type:name`) or name for entity-scoped recall
        #[arg(long)]
        entity: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show store and decay statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one decay pass now, even if periodic decay is disabled
    Decay,
    /// Restore a concept (or every concept) to full freshness
    ResetDecay {
        /// Concept id
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,
        /// Reset every concept
        #[arg(long)]
        all: bool,
    },
    /// Run database diagnostics
    Doctor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = MnemoConfig::load()?;

    // Initialize tracing with the configured log level.
    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            // Blocking HTTP embedders must be created and dropped outside the
            // runtime, so `state` outlives it.
            let state = server::SharedState::open(config)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(server::serve_stdio(state.clone()))?;
        }
        Command::Recall {
            query,
            k,
            entity,
            json,
        } => {
            cli::recall::recall(&config, query.as_deref(), k, entity.as_deref(), json)?;
        }
        Command::Stats { json } => {
            cli::stats::stats(&config, json)?;
        }
        Command::Decay => {
            cli::decay::decay(&config)?;
        }
        Command::ResetDecay { id, all } => {
            cli::decay::reset_decay(&config, id.as_deref(), all)?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
    }

    Ok(())
}
