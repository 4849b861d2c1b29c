use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteMemoryParams {
    #[schemars(description = "Tier the memory lives in")]
    pub tier: String,

    #[schemars(description = "ID of the memory to delete permanently")]
    pub id: String,

    #[schemars(description = "Why this memory is being deleted (recorded in the audit log)")]
    pub reason: Option<String>,

    #[schemars(description = "Must be true. Deletion cannot be undone.")]
    pub confirm: bool,
}
