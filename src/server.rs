//! MCP server initialization for the stdio transport.
//!
//! [`SharedState::open`] wires up the store, embedding provider and recall
//! orchestrator; [`serve_stdio`] hands them to the MCP tool handler.

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;

use mnemo::config::MnemoConfig;
use mnemo::{embedding, Recaller, Store};

use crate::tools::MnemoTools;

const EMBEDDING_MODEL_KEY: &str = "embedding_model";

/// State shared by every tool call. The recaller is used without an outer lock
/// so a slow embedding call never blocks other tools.
#[derive(Clone)]
pub struct SharedState {
    pub recaller: Arc<Recaller>,
    pub config: Arc<MnemoConfig>,
}

impl SharedState {
    /// Open the database, create the embedding provider and load the recall counter.
    pub fn open(config: MnemoConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let store = Arc::new(Store::open(&db_path).context("failed to open database")?);
        tracing::info!(db = %db_path.display(), "database ready");

        let embedder = embedding::create_provider(&config.embedding)?;
        check_embedding_model(&store, embedder.model_name())?;
        tracing::info!(provider = %config.embedding.provider, "embedding provider ready");

        let recaller = Recaller::new(store, embedder, &config)?;
        tracing::info!(recall_count = recaller.recall_count(), "recall orchestrator ready");

        Ok(Self {
            recaller: Arc::new(recaller),
            config: Arc::new(config),
        })
    }
}

/// Record the model on first use and warn when it changes afterwards; vectors
/// from different models are not comparable.
fn check_embedding_model(store: &Store, model: &str) -> Result<()> {
    if model == "none" {
        return Ok(());
    }
    match store.get_metadata(EMBEDDING_MODEL_KEY)? {
        Some(stored) if stored != model => {
            tracing::warn!(
                stored = %stored,
                configured = %model,
                "embedding model changed; stored concept vectors may not match query vectors"
            );
        }
        Some(_) => {}
        None => store.set_metadata(EMBEDDING_MODEL_KEY, model)?,
    }
    Ok(())
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(state: SharedState) -> Result<()> {
    tracing::info!("starting mnemo MCP server on stdio");

    let tools = MnemoTools::new(state);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}
