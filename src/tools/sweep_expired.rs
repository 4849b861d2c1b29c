use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SweepExpiredParams {
    #[schemars(description = "Count eligible memories without deleting them (default: false)")]
    pub dry_run: Option<bool>,
}
