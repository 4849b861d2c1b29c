//! Tiered store: the three memory tables and their write path.
//!
//! [`insert`] validates a [`NewMemory`], writes it into its tier's table and
//! appends the audit row inside a savepoint of the same transaction: a failed
//! audit append is rolled back on its own and logged, the memory still commits.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, DropBehavior, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::config::RetentionConfig;
use crate::embedding::EMBEDDING_DIM;
use crate::error::{MemoryError, Result};
use crate::memory::audit::{self, AuditEvent, AuditOperation};
use crate::memory::types::{
    format_timestamp, validate_importance, MemoryMetadata, MemoryRecord, NewMemory, Tier,
    DEFAULT_IMPORTANCE,
};

/// Result of an insert.
#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    pub id: String,
    pub tier: Tier,
    /// `true` when a request token matched an earlier write and no row was added.
    pub replayed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Insert a memory and audit it as a `write`.
pub fn insert(
    conn: &mut Connection,
    memory: &NewMemory,
    embedding: &[f32],
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<InsertOutcome> {
    insert_audited(conn, memory, embedding, retention, now, AuditOperation::Write, None)
}

/// Insert with a caller-chosen audit operation and extra audit details
/// (promotion records its source here).
pub(crate) fn insert_audited(
    conn: &mut Connection,
    memory: &NewMemory,
    embedding: &[f32],
    retention: &RetentionConfig,
    now: DateTime<Utc>,
    operation: AuditOperation,
    extra_details: Option<serde_json::Value>,
) -> Result<InsertOutcome> {
    memory.validate()?;
    validate_embedding(embedding)?;

    let tier = memory.tier;
    let mut tx = conn.transaction()?;

    // 1. Idempotent replay
    if let Some(token) = memory.request_token.as_deref() {
        if let Some((existing_id, existing_owner, expires_at)) = find_by_token(&tx, tier, token)? {
            if existing_owner != memory.owner_id {
                return Err(MemoryError::validation(
                    "request_token already used by another owner",
                ));
            }
            tracing::debug!(id = %existing_id, tier = %tier, "idempotent replay");
            return Ok(InsertOutcome {
                id: existing_id,
                tier,
                replayed: true,
                expires_at,
            });
        }
    }

    // 2. Timestamps
    let id = uuid::Uuid::now_v7().to_string();
    let created_at = format_timestamp(now);
    let expires_at = retention.ttl(tier).map(|ttl| format_timestamp(now + ttl));

    // 3. Row
    insert_row(&tx, &id, memory, embedding, &created_at, expires_at.as_deref())?;

    // 4. Audit, isolated in a savepoint
    let mut details = serde_json::json!({
        "kind": memory.kind,
        "scope": memory.scope.as_str(),
    });
    if let Some(serde_json::Value::Object(extra)) = extra_details {
        if let Some(map) = details.as_object_mut() {
            map.extend(extra);
        }
    }
    append_audit_isolated(
        &mut tx,
        &AuditEvent::success(operation, &memory.owner_id)
            .tier(tier)
            .record(&id)
            .details(details),
    )?;

    tx.commit()?;

    tracing::debug!(id = %id, tier = %tier, owner = %memory.owner_id, "memory inserted");

    Ok(InsertOutcome {
        id,
        tier,
        replayed: false,
        expires_at,
    })
}

fn insert_row(
    tx: &Transaction,
    id: &str,
    memory: &NewMemory,
    embedding: &[f32],
    created_at: &str,
    expires_at: Option<&str>,
) -> Result<()> {
    let embedding_bytes = super::embedding_to_bytes(embedding);
    let importance = memory.importance.unwrap_or(DEFAULT_IMPORTANCE);
    let metadata_json = memory
        .metadata
        .as_ref()
        .filter(|m| !m.is_empty())
        .map(serde_json::to_string)
        .transpose()?;

    match memory.tier {
        Tier::ShortTerm | Tier::MediumTerm => {
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, owner_id, scope, kind, content, embedding, importance, \
                     created_at, expires_at, metadata, request_token) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    memory.tier.table()
                ),
                params![
                    id,
                    memory.owner_id,
                    memory.scope.as_str(),
                    memory.kind,
                    memory.content,
                    embedding_bytes,
                    importance,
                    created_at,
                    expires_at,
                    metadata_json,
                    memory.request_token,
                ],
            )?;
        }
        Tier::LongTerm => {
            let tags_json = memory
                .normalized_tags()
                .map(|t| serde_json::to_string(&t))
                .transpose()?;
            tx.execute(
                "INSERT INTO memories_long_term (id, owner_id, scope, kind, content, embedding, \
                 importance, created_at, tags, access_count, metadata, request_token) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
                params![
                    id,
                    memory.owner_id,
                    memory.scope.as_str(),
                    memory.kind,
                    memory.content,
                    embedding_bytes,
                    importance,
                    created_at,
                    tags_json,
                    metadata_json,
                    memory.request_token,
                ],
            )?;
        }
    }
    Ok(())
}

/// Append an audit row inside its own savepoint. A failure rolls back only the
/// savepoint and is logged; the surrounding transaction carries on.
fn append_audit_isolated(tx: &mut Transaction, event: &AuditEvent<'_>) -> Result<()> {
    let mut sp = tx.savepoint_with_name("audit")?;
    match audit::record(&sp, event) {
        Ok(_) => sp.commit()?,
        Err(e) => {
            tracing::warn!(
                record_id = event.record_id.unwrap_or("-"),
                error = %e,
                "audit append failed; memory write kept"
            );
            sp.set_drop_behavior(DropBehavior::Rollback);
            sp.finish()?;
        }
    }
    Ok(())
}

fn find_by_token(
    tx: &Transaction,
    tier: Tier,
    token: &str,
) -> Result<Option<(String, String, Option<String>)>> {
    let expires_col = if tier.expires() { "expires_at" } else { "NULL" };
    let row = tx
        .query_row(
            &format!(
                "SELECT id, owner_id, {expires_col} FROM {} WHERE request_token = ?1",
                tier.table()
            ),
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(row)
}

/// Embeddings must have the configured dimension and a usable norm; a zero
/// vector would make every cosine comparison meaningless.
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(MemoryError::validation(format!(
            "embedding has {} dimensions, expected {EMBEDDING_DIM}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(MemoryError::validation("embedding contains non-finite values"));
    }
    if embedding.iter().all(|x| *x == 0.0) {
        return Err(MemoryError::validation("embedding is a zero vector"));
    }
    Ok(())
}

// ── Reads ────────────────────────────────────────────────────────────────────

/// Column list shared by every tier so one row mapper serves all three tables.
pub(crate) fn record_columns(tier: Tier) -> &'static str {
    match tier {
        Tier::ShortTerm | Tier::MediumTerm => {
            "id, owner_id, scope, kind, content, embedding, importance, created_at, \
             expires_at, NULL AS tags, NULL AS access_count, NULL AS last_accessed_at, metadata"
        }
        Tier::LongTerm => {
            "id, owner_id, scope, kind, content, embedding, importance, created_at, \
             NULL AS expires_at, tags, access_count, last_accessed_at, metadata"
        }
    }
}

/// Number of columns produced by [`record_columns`].
pub(crate) const RECORD_COLUMN_COUNT: usize = 13;

pub(crate) fn map_record(tier: Tier, row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let embedding_bytes: Vec<u8> = row.get(5)?;
    let tags: Option<String> = row.get(9)?;
    let metadata: Option<String> = row.get(12)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        tier,
        owner_id: row.get(1)?,
        scope: parse_column(row, 2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        embedding: super::bytes_to_embedding(&embedding_bytes),
        importance: row.get(6)?,
        created_at: row.get(7)?,
        expires_at: row.get(8)?,
        tags: tags.and_then(|t| serde_json::from_str(&t).ok()),
        access_count: row.get(10)?,
        last_accessed_at: row.get(11)?,
        metadata: metadata.and_then(|m| serde_json::from_str::<MemoryMetadata>(&m).ok()),
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Fetch a record by id. Expired-but-unswept rows are still returned; callers
/// that enforce visibility check expiry themselves.
pub fn get_by_id(conn: &Connection, tier: Tier, id: &str) -> Result<MemoryRecord> {
    find_by_id(conn, tier, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))
}

pub fn find_by_id(conn: &Connection, tier: Tier, id: &str) -> Result<Option<MemoryRecord>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        record_columns(tier),
        tier.table()
    );
    Ok(conn
        .query_row(&sql, params![id], |row| map_record(tier, row))
        .optional()?)
}

// ── Mutations ────────────────────────────────────────────────────────────────

/// Delete rows of `tier` whose `expires_at` is at or before `now`.
/// Long-term is a no-op returning 0 so sweep loops can treat tiers uniformly.
pub fn delete_expired(conn: &Connection, tier: Tier, now: &str) -> Result<usize> {
    if !tier.expires() {
        return Ok(0);
    }
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE expires_at <= ?1", tier.table()),
        params![now],
    )?;
    Ok(deleted)
}

/// Rows a sweep at `now` would delete.
pub fn count_expired(conn: &Connection, tier: Tier, now: &str) -> Result<usize> {
    if !tier.expires() {
        return Ok(0);
    }
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE expires_at <= ?1", tier.table()),
        params![now],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Set `importance`. Returns `false` if no such record exists.
pub fn update_importance(conn: &Connection, tier: Tier, id: &str, importance: f64) -> Result<bool> {
    validate_importance(importance)?;
    let updated = conn.execute(
        &format!("UPDATE {} SET importance = ?1 WHERE id = ?2", tier.table()),
        params![importance, id],
    )?;
    Ok(updated > 0)
}

/// Bump `access_count` and `last_accessed_at` on long-term records.
pub fn record_access(conn: &Connection, ids: &[&str], now: &str) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare(
        "UPDATE memories_long_term SET access_count = access_count + 1, last_accessed_at = ?1 \
         WHERE id = ?2",
    )?;
    let mut touched = 0;
    for id in ids {
        touched += stmt.execute(params![now, id])?;
    }
    Ok(touched)
}

/// Remove a record permanently. Returns `false` if it did not exist.
pub fn delete(conn: &Connection, tier: Tier, id: &str) -> Result<bool> {
    let deleted = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", tier.table()),
        params![id],
    )?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Scope;

    fn test_db() -> Connection {
        crate::db::open_in_memory().unwrap()
    }

    /// Unit vector along dimension 0.
    fn embedding_a() -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        v
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn short(owner: &str, content: &str) -> NewMemory {
        NewMemory::new(Tier::ShortTerm, owner, Scope::Restricted, "preference", content)
    }

    #[test]
    fn insert_then_get_returns_identical_content_and_embedding() {
        let mut conn = test_db();
        let emb = embedding_a();
        let memory = short("u1", "prefers dark mode");
        let out = insert(&mut conn, &memory, &emb, &RetentionConfig::default(), now()).unwrap();
        assert!(!out.replayed);
        assert!(out.expires_at.is_some());

        let rec = get_by_id(&conn, Tier::ShortTerm, &out.id).unwrap();
        assert_eq!(rec.content, "prefers dark mode");
        assert_eq!(rec.embedding, emb);
        assert_eq!(rec.owner_id, "u1");
        assert_eq!(rec.importance, DEFAULT_IMPORTANCE);
        assert!(rec.expires_at.as_deref().unwrap() > rec.created_at.as_str());
        assert!(rec.access_count.is_none());
    }

    #[test]
    fn long_term_records_have_no_expiry_and_keep_tags() {
        let mut conn = test_db();
        let memory =
            NewMemory::new(Tier::LongTerm, "u1", Scope::Shared, "fact", "Rust 2024 edition")
                .with_tags(["rust", "edition", "rust"])
                .with_importance(0.9);
        let out = insert(&mut conn, &memory, &embedding_a(), &RetentionConfig::default(), now())
            .unwrap();
        assert!(out.expires_at.is_none());

        let rec = get_by_id(&conn, Tier::LongTerm, &out.id).unwrap();
        assert!(rec.expires_at.is_none());
        assert_eq!(rec.tags.unwrap(), vec!["rust", "edition"]);
        assert_eq!(rec.access_count, Some(0));
        assert_eq!(rec.importance, 0.9);
    }

    #[test]
    fn insert_rejects_bad_input() {
        let mut conn = test_db();
        let retention = RetentionConfig::default();

        let err = insert(&mut conn, &short("u1", ""), &embedding_a(), &retention, now())
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let err = insert(&mut conn, &short("u1", "x"), &[1.0, 0.0], &retention, now()).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let zero = vec![0.0f32; EMBEDDING_DIM];
        let err = insert(&mut conn, &short("u1", "x"), &zero, &retention, now()).unwrap_err();
        assert!(err.to_string().contains("zero vector"));
    }

    #[test]
    fn insert_writes_exactly_one_audit_row() {
        let mut conn = test_db();
        let retention = RetentionConfig::default();
        let out = insert(&mut conn, &short("u1", "x"), &embedding_a(), &retention, now()).unwrap();
        let (count, op): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(operation) FROM audit_log WHERE record_id = ?1",
                params![out.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(op, "write");
    }

    #[test]
    fn audit_failure_does_not_roll_back_insert() {
        let mut conn = test_db();
        conn.execute_batch("DROP TABLE audit_log;").unwrap();

        let memory = short("u1", "still stored");
        let retention = RetentionConfig::default();
        let out = insert(&mut conn, &memory, &embedding_a(), &retention, now()).unwrap();
        let rec = get_by_id(&conn, Tier::ShortTerm, &out.id).unwrap();
        assert_eq!(rec.content, "still stored");
    }

    #[test]
    fn request_token_makes_insert_idempotent() {
        let mut conn = test_db();
        let retention = RetentionConfig::default();
        let memory = short("u1", "retry me").with_request_token("req-1");

        let first = insert(&mut conn, &memory, &embedding_a(), &retention, now()).unwrap();
        let second = insert(&mut conn, &memory, &embedding_a(), &retention, now()).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.replayed);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories_short_term", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let other = short("u2", "retry me").with_request_token("req-1");
        assert!(insert(&mut conn, &other, &embedding_a(), &retention, now()).is_err());
    }

    #[test]
    fn get_by_id_missing_is_not_found() {
        let conn = test_db();
        let err = get_by_id(&conn, Tier::MediumTerm, "nope").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn delete_expired_only_touches_past_rows() {
        let mut conn = test_db();
        let retention = RetentionConfig::default();
        let old = now() - chrono::Duration::hours(2);
        let expired = insert(&mut conn, &short("u1", "old"), &embedding_a(), &retention, old)
            .unwrap();
        let live = insert(&mut conn, &short("u1", "new"), &embedding_a(), &retention, now())
            .unwrap();

        let now_ts = format_timestamp(now());
        assert_eq!(count_expired(&conn, Tier::ShortTerm, &now_ts).unwrap(), 1);
        assert_eq!(delete_expired(&conn, Tier::ShortTerm, &now_ts).unwrap(), 1);
        assert_eq!(delete_expired(&conn, Tier::ShortTerm, &now_ts).unwrap(), 0);

        assert!(find_by_id(&conn, Tier::ShortTerm, &expired.id).unwrap().is_none());
        assert!(find_by_id(&conn, Tier::ShortTerm, &live.id).unwrap().is_some());
    }

    #[test]
    fn delete_expired_on_long_term_is_noop() {
        let mut conn = test_db();
        let memory = NewMemory::new(Tier::LongTerm, "u1", Scope::Restricted, "fact", "keep");
        insert(&mut conn, &memory, &embedding_a(), &RetentionConfig::default(), now()).unwrap();
        let far_future = format_timestamp(now() + chrono::Duration::days(10_000));
        assert_eq!(delete_expired(&conn, Tier::LongTerm, &far_future).unwrap(), 0);
    }

    #[test]
    fn access_tracking_and_importance_updates() {
        let mut conn = test_db();
        let memory = NewMemory::new(Tier::LongTerm, "u1", Scope::Restricted, "fact", "tracked");
        let out = insert(&mut conn, &memory, &embedding_a(), &RetentionConfig::default(), now())
            .unwrap();

        let ts = format_timestamp(now());
        assert_eq!(record_access(&conn, &[out.id.as_str()], &ts).unwrap(), 1);
        assert!(update_importance(&conn, Tier::LongTerm, &out.id, 0.8).unwrap());
        assert!(!update_importance(&conn, Tier::LongTerm, "missing", 0.8).unwrap());
        assert!(update_importance(&conn, Tier::LongTerm, &out.id, 2.0).is_err());

        let rec = get_by_id(&conn, Tier::LongTerm, &out.id).unwrap();
        assert_eq!(rec.access_count, Some(1));
        assert_eq!(rec.last_accessed_at.as_deref(), Some(ts.as_str()));
        assert_eq!(rec.importance, 0.8);
    }

    #[test]
    fn metadata_round_trips() {
        let mut conn = test_db();
        let memory = short("u1", "with metadata").with_metadata(MemoryMetadata {
            source: Some("chat".into()),
            session_id: Some("s-42".into()),
            topic: None,
        });
        let out = insert(&mut conn, &memory, &embedding_a(), &RetentionConfig::default(), now())
            .unwrap();
        let rec = get_by_id(&conn, Tier::ShortTerm, &out.id).unwrap();
        assert_eq!(rec.metadata.unwrap().session_id.as_deref(), Some("s-42"));
    }
}
