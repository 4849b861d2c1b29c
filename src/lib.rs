//! Tiered memory for AI agents, served over MCP.
//!
//! Mnemos stores natural-language memories with their embeddings in three
//! tiers that differ only in lifetime:
//!
//! | Tier | Default lifetime | Extra fields |
//! |------|------------------|--------------|
//! | **short_term** | 6 hours | `session_id` metadata |
//! | **medium_term** | 7 days | `session_id` metadata |
//! | **long_term** | until deleted | tags, `topic` metadata, access tracking |
//!
//! Every record has an owner and a visibility scope (`restricted`, `shared`
//! or `full`). A caller sees a record when it owns it, when the record is
//! shared, or when the caller itself holds elevated (`full`) access.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) cosine distance, one
//!   table per tier and an append-only audit log
//! - **Embeddings**: local ONNX Runtime (all-MiniLM-L6-v2, 384 dimensions), an
//!   OpenAI-compatible HTTP endpoint, or a deterministic hashing provider, all
//!   behind a retrying gateway
//! - **Search**: per-tier similarity scan merged with a deterministic
//!   tie-break on importance, recency and id
//! - **Retention**: a supervised background sweeper deletes expired records
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP
//!
//! # Modules
//!
//! - [`auth`]: API keys, the server principal and acting on behalf of callers
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations and health checks
//! - [`embedding`]: Providers and the retrying embedding gateway
//! - [`error`]: The error taxonomy shared by every operation
//! - [`memory`]: Records, scopes, storage, search, stats, sweeping and auditing
//! - [`server`]: Transport setup
//! - [`tools`]: The MCP tool surface

pub mod auth;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod server;
pub mod tools;
