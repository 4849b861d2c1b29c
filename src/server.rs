//! MCP server initialization for stdio and HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, embedding gateway, retention sweeper and MCP tool handler into a
//! running server.

use std::sync::Arc;

use anyhow::Result;
use axum::{middleware, routing::get, Json};
use rmcp::ServiceExt;

use crate::auth::{self, StaticKeyResolver};
use crate::config::MnemosConfig;
use crate::db::{self, Database};
use crate::embedding::{self, EmbeddingGateway};
use crate::memory::scope::Caller;
use crate::memory::service::MemoryService;
use crate::memory::sweeper::{RetentionSweeper, SweeperHandle};
use crate::tools::MnemosTools;

/// Everything a transport needs to build tool handlers.
pub struct Runtime {
    pub service: MemoryService,
    sweeper: Option<SweeperHandle>,
}

impl Runtime {
    /// Open the database, build the embedding gateway and start the sweeper.
    pub fn start(config: &MnemosConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let database = Database::open(&db_path)?;
        tracing::info!(db = %db_path.display(), "database ready");

        let provider = embedding::create_provider(&config.embedding)?;
        check_model_marker(&database, provider.model_name())?;
        let gateway = Arc::new(EmbeddingGateway::new(provider, &config.embedding));
        tracing::info!(model = gateway.model_name(), "embedding provider ready");

        let sweeper = if config.retention.sweep_enabled {
            Some(RetentionSweeper::spawn(database.clone(), &config.retention))
        } else {
            tracing::info!("retention sweeper disabled");
            None
        };

        Ok(Self {
            service: MemoryService::new(database, gateway, config),
            sweeper,
        })
    }

    /// Tools that run every call as `principal`.
    pub fn tools(&self, principal: Caller) -> MnemosTools {
        MnemosTools::new(self.service.clone(), principal)
    }

    /// Stop background work. The database handles close when dropped.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.shutdown().await;
        }
    }
}

/// Record the embedding model on first use; warn when it later changes, since
/// vectors from different models are not comparable.
fn check_model_marker(database: &Database, model: &str) -> Result<()> {
    let conn = database.writer();
    match db::migrations::get_embedding_model(&conn)? {
        None => db::migrations::set_embedding_model(&conn, model)?,
        Some(stored) if stored != model => {
            tracing::warn!(
                stored = %stored,
                configured = %model,
                "embedding model changed; existing vectors will not match new queries"
            );
        }
        Some(_) => {}
    }
    Ok(())
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: MnemosConfig) -> Result<()> {
    tracing::info!("starting Mnemos MCP server on stdio");

    let principal = auth::principal_from_config(&config)?;
    let runtime = Runtime::start(&config)?;
    let transport = rmcp::transport::stdio();

    let server = runtime.tools(principal.clone()).serve(transport).await?;
    tracing::info!(principal = %principal.id, "MCP server running, waiting for client");

    let result = server.waiting().await;
    runtime.shutdown().await;
    tracing::info!("MCP server shut down");

    result?;
    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: MnemosConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Mnemos MCP server on HTTP");

    let resolver = Arc::new(StaticKeyResolver::from_config(&config.auth));
    // With keys, every request runs as the holder of the key it presents
    let fixed_principal = if resolver.is_empty() {
        tracing::warn!("no [[auth.keys]] configured; HTTP transport is unauthenticated");
        Some(auth::principal_from_config(&config)?)
    } else {
        None
    };

    let runtime = Runtime::start(&config)?;

    let service = {
        let service = runtime.service.clone();
        let fixed_principal = fixed_principal.clone();
        rmcp::transport::streamable_http_server::StreamableHttpService::new(
            move || {
                Ok(match &fixed_principal {
                    Some(principal) => MnemosTools::new(service.clone(), principal.clone()),
                    None => MnemosTools::authenticated(service.clone()),
                })
            },
            rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
                .into(),
            Default::default(),
        )
    };

    let mut router = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", get(health));
    if fixed_principal.is_none() {
        router = router.layer(middleware::from_fn_with_state(
            resolver,
            auth::require_api_key,
        ));
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await;

    runtime.shutdown().await;
    served?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_marker_is_written_once() {
        let database = Database::in_memory().unwrap();
        check_model_marker(&database, "fnv1a-token-hash").unwrap();
        check_model_marker(&database, "all-MiniLM-L6-v2").unwrap();

        let conn = database.reader();
        assert_eq!(
            db::migrations::get_embedding_model(&conn).unwrap().as_deref(),
            Some("fnv1a-token-hash")
        );
    }
}
