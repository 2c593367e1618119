use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The `decay_stats` tool takes no arguments.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DecayStatsParams {}
