use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ResetDecayParams {
    #[schemars(description = "ID of the concept to restore to full freshness")]
    pub concept_id: String,
}
