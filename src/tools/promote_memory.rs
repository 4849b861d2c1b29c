use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PromoteMemoryParams {
    #[schemars(description = "Current tier of the memory")]
    pub tier: String,

    #[schemars(description = "ID of the memory to promote")]
    pub id: String,

    #[schemars(description = "Longer-lived tier to copy the memory into")]
    pub target_tier: String,

    #[schemars(description = "Identity to act as")]
    pub caller_id: Option<String>,
}
