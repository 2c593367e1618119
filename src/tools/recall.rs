//! MCP `recall` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `recall` MCP tool.
///
/// Provide `query` for semantic recall, or `entity` for everything known about
/// one entity. With both, `entity` wins.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecallParams {
    #[schemars(description = "Natural language query. Required unless 'entity' is provided.")]
    pub query: Option<String>,

    #[schemars(
        description = "Entity id ('type:name') or name for entity-scoped recall. Bypasses similarity search."
    )]
    pub entity: Option<String>,

    /// Maximum number of concepts to return (1–50). Defaults to `retrieval.default_k`.
    #[schemars(description = "Maximum number of concepts to return (1-50). Defaults to 5.")]
    pub k: Option<usize>,
}
