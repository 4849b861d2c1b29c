#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemos::config::MnemosConfig;
use mnemos::db::{self, Database};
use mnemos::embedding::hashed::HashedEmbeddingProvider;
use mnemos::embedding::{EmbeddingGateway, EMBEDDING_DIM};
use mnemos::memory::service::{MemoryService, SearchRequest, WriteRequest};
use mnemos::memory::types::{NewMemory, Scope, Tier};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_in_memory().unwrap()
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Different seeds produce orthogonal vectors.
pub fn test_embedding(seed: u16) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed as usize % EMBEDDING_DIM] = 1.0;
    v
}

/// Unit vector with cosine `cos` to `test_embedding(a)`, leaning toward `test_embedding(b)`.
pub fn blended_embedding(a: u16, b: u16, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[a as usize % EMBEDDING_DIM] = cos;
    v[b as usize % EMBEDDING_DIM] = (1.0 - cos * cos).sqrt();
    v
}

/// Insert a memory directly through the store at `now`. Returns the memory ID.
pub fn insert_memory(
    conn: &mut Connection,
    tier: Tier,
    owner: &str,
    scope: Scope,
    content: &str,
    embedding: &[f32],
    now: DateTime<Utc>,
) -> String {
    let memory = NewMemory::new(tier, owner, scope, "fact", content);
    mnemos::memory::store::insert(conn, &memory, embedding, &MnemosConfig::default().retention, now)
        .unwrap()
        .id
}

/// A service over `database` using the deterministic hashing provider.
pub fn service_with(database: Database, config: &MnemosConfig) -> MemoryService {
    let gateway = EmbeddingGateway::new(
        Arc::new(HashedEmbeddingProvider::new(EMBEDDING_DIM)),
        &config.embedding,
    );
    MemoryService::new(database, Arc::new(gateway), config)
}

pub fn test_service() -> MemoryService {
    service_with(Database::in_memory().unwrap(), &MnemosConfig::default())
}

pub fn write_request(tier: Tier, scope: Scope, content: &str) -> WriteRequest {
    WriteRequest {
        owner_id: None,
        scope,
        tier,
        kind: "preference".into(),
        content: content.into(),
        importance: None,
        tags: None,
        metadata: None,
        request_token: None,
    }
}

pub fn search_request(query: &str, top_k: i64) -> SearchRequest {
    SearchRequest {
        query: query.into(),
        top_k: Some(top_k),
        ..Default::default()
    }
}
