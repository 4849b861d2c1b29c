pub mod delete_memory;
pub mod get_memory;
pub mod memory_audit;
pub mod memory_stats;
pub mod promote_memory;
pub mod search_memory;
pub mod sweep_expired;
pub mod update_importance;
pub mod write_memory;

use axum::http::request::Parts;
use delete_memory::DeleteMemoryParams;
use get_memory::GetMemoryParams;
use memory_audit::MemoryAuditParams;
use memory_stats::MemoryStatsParams;
use promote_memory::PromoteMemoryParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::Extensions;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memory::SearchMemoryParams;
use serde::Serialize;
use sweep_expired::SweepExpiredParams;
use update_importance::UpdateImportanceParams;
use write_memory::WriteMemoryParams;

use crate::auth::act_as;
use crate::error::MemoryError;
use crate::memory::audit::{AuditFilter, AuditOperation};
use crate::memory::scope::Caller;
use crate::memory::service::{MemoryService, SearchRequest, WriteRequest};
use crate::memory::types::{MemoryMetadata, Scope, Tier};

/// The Mnemos MCP tool handler. Every call resolves its principal, then the
/// caller it acts as, then delegates to [`MemoryService`].
#[derive(Clone)]
pub struct MnemosTools {
    tool_router: ToolRouter<Self>,
    service: MemoryService,
    principal: PrincipalSource,
}

#[derive(Debug, Clone)]
enum PrincipalSource {
    /// One identity for the whole session (stdio, or HTTP without keys).
    Fixed(Caller),
    /// The caller [`crate::auth::require_api_key`] attached to the HTTP request.
    PerRequest,
}

/// Errors cross the MCP boundary as `"<code>: <message>"`.
fn tool_error(e: MemoryError) -> String {
    format!("{}: {e}", e.code())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

fn parse_tier(s: &str) -> Result<Tier, String> {
    s.parse::<Tier>()
        .map_err(|e| tool_error(MemoryError::validation(e)))
}

fn parse_list<T>(values: Option<Vec<String>>) -> Result<Vec<T>, String>
where
    T: std::str::FromStr<Err = String>,
{
    values
        .unwrap_or_default()
        .iter()
        .map(|v| v.parse::<T>().map_err(|e| tool_error(MemoryError::validation(e))))
        .collect()
}

#[tool_router]
impl MnemosTools {
    /// Tools that run every call as `principal`.
    pub fn new(service: MemoryService, principal: Caller) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
            principal: PrincipalSource::Fixed(principal),
        }
    }

    /// Tools behind the bearer-key middleware: each call runs as the caller
    /// resolved from that request's key. Requests without one are refused.
    pub fn authenticated(service: MemoryService) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
            principal: PrincipalSource::PerRequest,
        }
    }

    fn principal(&self, extensions: &Extensions) -> Result<Caller, String> {
        match &self.principal {
            PrincipalSource::Fixed(caller) => Ok(caller.clone()),
            PrincipalSource::PerRequest => extensions
                .get::<Parts>()
                .and_then(|parts| parts.extensions.get::<Caller>())
                .cloned()
                .ok_or_else(|| {
                    tool_error(MemoryError::authorization("request is not authenticated"))
                }),
        }
    }

    fn caller(&self, extensions: &Extensions, caller_id: Option<&str>) -> Result<Caller, String> {
        act_as(&self.principal(extensions)?, caller_id).map_err(tool_error)
    }

    /// Store a new memory in one of the three tiers.
    #[tool(description = "Write a memory. Tiers: short_term (expires in hours), medium_term (days), long_term (until deleted). Returns the new id.")]
    async fn write_memory(
        &self,
        Parameters(params): Parameters<WriteMemoryParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let tier = parse_tier(&params.tier)?;
        let scope = match &params.scope {
            Some(s) => s
                .parse::<Scope>()
                .map_err(|e| tool_error(MemoryError::validation(e)))?,
            None => Scope::Restricted,
        };
        let metadata = match params.metadata {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(
                serde_json::from_value::<MemoryMetadata>(value)
                    .map_err(|e| tool_error(MemoryError::validation(format!("metadata: {e}"))))?,
            ),
        };

        let outcome = self
            .service
            .write_memory(
                &caller,
                WriteRequest {
                    owner_id: params.owner_id,
                    scope,
                    tier,
                    kind: params.kind,
                    content: params.content,
                    importance: params.importance,
                    tags: params.tags,
                    metadata,
                    request_token: params.request_token,
                },
            )
            .await
            .map_err(tool_error)?;

        to_json(&outcome)
    }

    /// Semantic search across tiers.
    #[tool(description = "Search memories by natural language query. Results are ranked by similarity, then importance, then recency.")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let request = SearchRequest {
            query: params.query,
            scopes: parse_list(params.scopes)?,
            kinds: params.kinds.unwrap_or_default(),
            tiers: parse_list(params.tiers)?,
            top_k: params.top_k,
            threshold: params.threshold,
            timeout_ms: params.timeout_ms,
        };

        let response = self
            .service
            .search_memory(&caller, request)
            .await
            .map_err(tool_error)?;
        to_json(&response)
    }

    #[tool(description = "Get memory statistics: counts per tier, unique owners, average importance, records awaiting sweep.")]
    async fn memory_stats(
        &self,
        Parameters(params): Parameters<MemoryStatsParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let tiers = parse_list(params.tiers)?;
        let stats = self
            .service
            .get_stats(&caller, params.owner_id, tiers)
            .await
            .map_err(tool_error)?;
        to_json(&stats)
    }

    #[tool(description = "Delete expired short_term and medium_term memories now. Requires elevated privilege.")]
    async fn sweep_expired(
        &self,
        Parameters(params): Parameters<SweepExpiredParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let principal = self.principal(&extensions)?;
        let report = self
            .service
            .sweep_expired(&principal, params.dry_run.unwrap_or(false))
            .await
            .map_err(tool_error)?;
        to_json(&report)
    }

    #[tool(description = "Fetch a single memory by tier and id.")]
    async fn get_memory(
        &self,
        Parameters(params): Parameters<GetMemoryParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let tier = parse_tier(&params.tier)?;
        let record = self
            .service
            .get_memory(&caller, tier, &params.id)
            .await
            .map_err(tool_error)?;
        to_json(&record)
    }

    #[tool(description = "Copy a memory into a longer-lived tier. The original is kept until it expires.")]
    async fn promote_memory(
        &self,
        Parameters(params): Parameters<PromoteMemoryParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let tier = parse_tier(&params.tier)?;
        let target = parse_tier(&params.target_tier)?;
        let outcome = self
            .service
            .promote(&caller, tier, &params.id, target)
            .await
            .map_err(tool_error)?;
        to_json(&outcome)
    }

    #[tool(description = "Change the importance (0.0-1.0) of a memory you own.")]
    async fn update_importance(
        &self,
        Parameters(params): Parameters<UpdateImportanceParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let tier = parse_tier(&params.tier)?;
        let record = self
            .service
            .update_importance(&caller, tier, &params.id, params.importance)
            .await
            .map_err(tool_error)?;
        to_json(&record)
    }

    /// Administrative hard delete.
    #[tool(description = "Permanently delete a memory. Requires elevated privilege and confirm=true.")]
    async fn delete_memory(
        &self,
        Parameters(params): Parameters<DeleteMemoryParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err(tool_error(MemoryError::validation(
                "confirm must be true to delete a memory",
            )));
        }
        let principal = self.principal(&extensions)?;
        let tier = parse_tier(&params.tier)?;
        self.service
            .delete_memory(&principal, tier, &params.id, params.reason)
            .await
            .map_err(tool_error)?;
        Ok(serde_json::json!({ "deleted": params.id, "tier": tier.as_str() }).to_string())
    }

    #[tool(description = "List audit log entries, newest first. Non-elevated callers only see their own entries.")]
    async fn memory_audit(
        &self,
        Parameters(params): Parameters<MemoryAuditParams>,
        extensions: Extensions,
    ) -> Result<String, String> {
        let caller = self.caller(&extensions, params.caller_id.as_deref())?;
        let operation = match params.operation.as_deref() {
            Some(op) => Some(
                op.parse::<AuditOperation>()
                    .map_err(|e| tool_error(MemoryError::validation(e)))?,
            ),
            None => None,
        };
        let entries = self
            .service
            .audit_history(
                &caller,
                AuditFilter {
                    record_id: params.record_id,
                    owner_id: params.owner_id,
                    operation,
                    limit: params.limit,
                },
            )
            .await
            .map_err(tool_error)?;
        to_json(&entries)
    }
}

#[tool_handler]
impl ServerHandler for MnemosTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Mnemos is a tiered memory server. Use write_memory to save memories, \
                 search_memory to find them, and promote_memory to keep a short-lived \
                 memory for longer."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
