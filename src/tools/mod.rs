pub mod decay_stats;
pub mod recall;
pub mod reset_decay;

use decay_stats::DecayStatsParams;
use recall::RecallParams;
use reset_decay::ResetDecayParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use std::sync::Arc;

use crate::server::SharedState;

const MAX_K: usize = 50;

/// The mnemo MCP tool handler. Holds the shared recall state and exposes the
/// tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct MnemoTools {
    tool_router: ToolRouter<Self>,
    state: SharedState,
}

#[tool_router]
impl MnemoTools {
    pub fn new(state: SharedState) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state,
        }
    }

    /// Recall concepts by query or entity.
    #[tool(description = "Recall knowledge. With 'query', ranks concepts by embedding similarity spread along typed relations and weighted by freshness. With 'entity', returns the concepts and episodes that mention it.")]
    async fn recall(
        &self,
        Parameters(params): Parameters<RecallParams>,
    ) -> Result<String, String> {
        let query = params.query.unwrap_or_default();
        if params.entity.is_none() && query.trim().is_empty() {
            return Err("either 'query' or 'entity' must be provided".into());
        }
        let k = params.k.unwrap_or(self.state.config.retrieval.default_k);
        if !(1..=MAX_K).contains(&k) {
            return Err(format!("k must be between 1 and {MAX_K}"));
        }

        tracing::info!(
            query_len = query.len(),
            entity = ?params.entity,
            k,
            "recall called"
        );

        // Embedding and SQLite are both blocking → spawn_blocking
        let recaller = Arc::clone(&self.state.recaller);
        let entity = params.entity;
        let result = tokio::task::spawn_blocking(move || {
            recaller
                .recall(&query, k, entity.as_deref())
                .map_err(|e| format!("recall failed: {e}"))
        })
        .await
        .map_err(|e| format!("recall task failed: {e}"))??;

        tracing::info!(
            returned = result.concepts.len(),
            recall_count = result.recall_count,
            decay_triggered = result.decay_triggered,
            "recall complete"
        );

        serde_json::to_string(&result).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Aggregate decay statistics.
    #[tool(description = "Get decay statistics: concept count, how many are below full freshness, and the average and minimum decay factor.")]
    async fn decay_stats(
        &self,
        Parameters(_params): Parameters<DecayStatsParams>,
    ) -> Result<String, String> {
        let recaller = Arc::clone(&self.state.recaller);
        let stats = tokio::task::spawn_blocking(move || {
            recaller.decay_stats().map_err(|e| format!("stats failed: {e}"))
        })
        .await
        .map_err(|e| format!("stats task failed: {e}"))??;

        serde_json::to_string(&stats).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Reset one concept's decay state.
    #[tool(description = "Restore a concept to full freshness (decay_factor 1.0) and zero its access count.")]
    async fn reset_decay(
        &self,
        Parameters(params): Parameters<ResetDecayParams>,
    ) -> Result<String, String> {
        tracing::info!(concept_id = %params.concept_id, "reset_decay called");

        let recaller = Arc::clone(&self.state.recaller);
        let concept_id = params.concept_id;
        let id_for_reply = concept_id.clone();
        tokio::task::spawn_blocking(move || {
            recaller
                .reset_decay(&concept_id)
                .map_err(|e| format!("reset failed: {e}"))
        })
        .await
        .map_err(|e| format!("reset task failed: {e}"))??;

        Ok(serde_json::json!({
            "concept_id": id_for_reply,
            "decay_factor": 1.0,
            "status": "reset"
        })
        .to_string())
    }
}

#[tool_handler]
impl ServerHandler for MnemoTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "mnemo is an agent memory engine. Use recall with a query or an entity to \
                 retrieve knowledge; decay_stats and reset_decay inspect and repair freshness."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
