//! MCP `write_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `write_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WriteMemoryParams {
    #[schemars(description = "The natural language content of the memory")]
    pub content: String,

    #[schemars(
        description = "Lifetime tier: 'short_term' (hours), 'medium_term' (days) or 'long_term' (until deleted)"
    )]
    pub tier: String,

    #[schemars(description = "Free-form category, e.g. 'preference', 'fact', 'task'")]
    pub kind: String,

    #[schemars(
        description = "Visibility: 'restricted' (owner only, default), 'shared' (all callers) or 'full' (elevated callers only)"
    )]
    pub scope: Option<String>,

    #[schemars(description = "Owner of the memory. Defaults to the caller.")]
    pub owner_id: Option<String>,

    #[schemars(description = "Identity to act as. Requires an elevated server credential when it differs from the server's own.")]
    pub caller_id: Option<String>,

    #[schemars(description = "Importance 0.0-1.0. Defaults to 0.5.")]
    pub importance: Option<f64>,

    #[schemars(description = "Tags (long_term only)")]
    pub tags: Option<Vec<String>>,

    #[schemars(
        description = "Optional metadata object. Keys: 'source' (any tier), 'session_id' (short/medium only), 'topic' (long_term only)"
    )]
    pub metadata: Option<serde_json::Value>,

    #[schemars(description = "Idempotency token. Retrying with the same token returns the original id.")]
    pub request_token: Option<String>,
}
