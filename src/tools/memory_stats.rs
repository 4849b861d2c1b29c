//! MCP `memory_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `memory_stats` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryStatsParams {
    #[schemars(description = "Identity to compute stats as")]
    pub caller_id: Option<String>,

    /// Optional owner to restrict counts to.
    #[schemars(description = "Optional owner to filter stats by")]
    pub owner_id: Option<String>,

    #[schemars(description = "Tiers to include. Defaults to all.")]
    pub tiers: Option<Vec<String>>,
}
