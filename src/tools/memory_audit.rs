//! MCP `memory_audit` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `memory_audit` MCP tool.
///
/// Non-elevated callers only see entries recorded under their own identity.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryAuditParams {
    #[schemars(description = "Only entries about this memory id")]
    pub record_id: Option<String>,

    #[schemars(description = "Only entries recorded under this identity")]
    pub owner_id: Option<String>,

    #[schemars(
        description = "Only this operation: 'write', 'search', 'sweep', 'delete', 'promote', 'update_importance'"
    )]
    pub operation: Option<String>,

    #[schemars(description = "Maximum entries to return, newest first. Defaults to 100.")]
    pub limit: Option<usize>,

    #[schemars(description = "Identity to read as")]
    pub caller_id: Option<String>,
}
