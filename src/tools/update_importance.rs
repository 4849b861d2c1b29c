use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateImportanceParams {
    #[schemars(description = "Tier the memory lives in")]
    pub tier: String,

    #[schemars(description = "ID of the memory")]
    pub id: String,

    #[schemars(description = "New importance 0.0-1.0")]
    pub importance: f64,

    #[schemars(description = "Identity to act as")]
    pub caller_id: Option<String>,
}
