use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetMemoryParams {
    #[schemars(description = "Tier the memory lives in")]
    pub tier: String,

    #[schemars(description = "ID of the memory")]
    pub id: String,

    #[schemars(description = "Identity to read as")]
    pub caller_id: Option<String>,
}
