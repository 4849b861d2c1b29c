//! Credential resolution.
//!
//! Turns an API key into a [`Caller`] (identity plus access scope). Keys come
//! from `[[auth.keys]]` in the config and are compared in constant time. The
//! HTTP transport is guarded by [`require_api_key`], which attaches the
//! resolved caller to the request; tools run as that caller. Over stdio they
//! run as the server principal. Either way an elevated principal may act on
//! behalf of another identity (see [`act_as`]).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::config::{AuthConfig, MnemosConfig};
use crate::error::{MemoryError, Result};
use crate::memory::scope::Caller;
use crate::memory::types::Scope;

/// Identity used when no credentials are configured at all.
pub const LOCAL_IDENTITY: &str = "local";

/// Maps a presented credential to a caller.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<Caller>;
}

/// Resolver over the static key list in the config.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    entries: Vec<(Vec<u8>, Caller)>,
}

impl StaticKeyResolver {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            entries: config
                .keys
                .iter()
                .map(|k| (k.key.clone().into_bytes(), Caller::new(&k.caller_id, k.scope)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialResolver for StaticKeyResolver {
    fn resolve(&self, credential: &str) -> Result<Caller> {
        // Every entry is compared so timing does not reveal which one matched
        let mut found = None;
        for (key, caller) in &self.entries {
            if constant_time_eq(key, credential.as_bytes()) && found.is_none() {
                found = Some(caller.clone());
            }
        }
        found.ok_or_else(|| MemoryError::authorization("invalid credential"))
    }
}

/// Constant-time comparison; length mismatch returns early.
fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (a, b) in expected.iter().zip(provided.iter()) {
        result |= a ^ b;
    }
    result == 0
}

/// Resolve the identity the server acts under.
///
/// With `server.api_key` set, it must match an `[[auth.keys]]` entry. With no
/// keys configured at all, the process owner is the single elevated identity
/// [`LOCAL_IDENTITY`].
pub fn principal_from_config(config: &MnemosConfig) -> anyhow::Result<Caller> {
    let resolver = StaticKeyResolver::from_config(&config.auth);
    match config.server.api_key.as_deref() {
        Some(key) => resolver
            .resolve(key)
            .map_err(|_| anyhow::anyhow!("server.api_key does not match any [[auth.keys]] entry")),
        None if resolver.is_empty() => {
            warn!("no credentials configured; acting as the local elevated identity");
            Ok(Caller::new(LOCAL_IDENTITY, Scope::Full))
        }
        None => anyhow::bail!(
            "auth.keys is configured but server.api_key (or MNEMOS_API_KEY) is not set"
        ),
    }
}

/// The caller a tool call runs as. Acting for another identity requires an
/// elevated principal, and the represented identity gets baseline access.
pub fn act_as(principal: &Caller, caller_id: Option<&str>) -> Result<Caller> {
    match caller_id.map(str::trim) {
        None | Some("") => Ok(principal.clone()),
        Some(id) if id == principal.id => Ok(principal.clone()),
        Some(id) if principal.is_elevated() => Ok(Caller::restricted(id)),
        Some(_) => Err(MemoryError::authorization(
            "acting on behalf of another identity requires elevated privilege",
        )),
    }
}

#[derive(Debug, serde::Serialize)]
struct AuthError {
    error: String,
    code: &'static str,
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Bearer-token middleware for the HTTP transport. `/health` is exempt.
///
/// On success the resolved [`Caller`] is inserted into the request extensions.
pub async fn require_api_key(
    State(resolver): State<Arc<StaticKeyResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let resolved = extract_bearer_token(request.headers()).map(|token| resolver.resolve(token));
    match resolved {
        Some(Ok(caller)) => {
            tracing::debug!(caller = %caller.id, "request authenticated");
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Some(Err(_)) => {
            warn!("invalid API key provided");
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "Invalid API key".into(),
                    code: "INVALID_API_KEY",
                }),
            )
                .into_response()
        }
        None => {
            warn!("missing Authorization header");
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "Missing or invalid Authorization header. Use: Authorization: Bearer <key>"
                        .into(),
                    code: "MISSING_API_KEY",
                }),
            )
                .into_response()
        }
    }
}
