//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    /// Natural language query.
    #[schemars(description = "Natural language query to search memories")]
    pub query: String,

    #[schemars(description = "Identity to search as. Requires an elevated server credential when it differs from the server's own.")]
    pub caller_id: Option<String>,

    /// Scopes to include. Empty means every scope the caller may request.
    #[schemars(description = "Scopes to include: 'restricted', 'shared', 'full'. Defaults to all permitted.")]
    pub scopes: Option<Vec<String>>,

    #[schemars(description = "Only return memories of these kinds")]
    pub kinds: Option<Vec<String>>,

    #[schemars(description = "Tiers to search: 'short_term', 'medium_term', 'long_term'. Defaults to all.")]
    pub tiers: Option<Vec<String>>,

    /// Maximum number of results. Defaults to `retrieval.default_top_k`.
    #[schemars(description = "Maximum number of results to return. Defaults to 5.")]
    pub top_k: Option<i64>,

    #[schemars(description = "Minimum cosine similarity (-1.0 to 1.0). Defaults to 0.3.")]
    pub threshold: Option<f64>,

    #[schemars(description = "Search deadline in milliseconds. 0 disables it.")]
    pub timeout_ms: Option<u64>,
}
