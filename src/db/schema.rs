//! SQL DDL for all mnemos tables.
//!
//! Defines the three tier tables (`memories_short_term`, `memories_medium_term`,
//! `memories_long_term`), the append-only `audit_log`, and `schema_meta`. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization. Embeddings are stored as
//! little-endian f32 BLOBs and compared with sqlite-vec's `vec_distance_cosine`.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Short-term tier: minutes to hours, swept on expiry
CREATE TABLE IF NOT EXISTS memories_short_term (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('restricted','shared','full')),
    kind TEXT NOT NULL CHECK(length(kind) > 0),
    content TEXT NOT NULL CHECK(length(content) > 0),
    embedding BLOB NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL CHECK(expires_at > created_at),
    metadata TEXT,
    request_token TEXT UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_short_term_owner ON memories_short_term(owner_id);
CREATE INDEX IF NOT EXISTS idx_short_term_expires ON memories_short_term(expires_at);
CREATE INDEX IF NOT EXISTS idx_short_term_scope ON memories_short_term(scope);

-- Medium-term tier: days, swept on expiry
CREATE TABLE IF NOT EXISTS memories_medium_term (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('restricted','shared','full')),
    kind TEXT NOT NULL CHECK(length(kind) > 0),
    content TEXT NOT NULL CHECK(length(content) > 0),
    embedding BLOB NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL CHECK(expires_at > created_at),
    metadata TEXT,
    request_token TEXT UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_medium_term_owner ON memories_medium_term(owner_id);
CREATE INDEX IF NOT EXISTS idx_medium_term_expires ON memories_medium_term(expires_at);
CREATE INDEX IF NOT EXISTS idx_medium_term_scope ON memories_medium_term(scope);

-- Long-term tier: no expiry, tags and access tracking
CREATE TABLE IF NOT EXISTS memories_long_term (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('restricted','shared','full')),
    kind TEXT NOT NULL CHECK(length(kind) > 0),
    content TEXT NOT NULL CHECK(length(content) > 0),
    embedding BLOB NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance >= 0.0 AND importance <= 1.0),
    created_at TEXT NOT NULL,
    tags TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    metadata TEXT,
    request_token TEXT UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_long_term_owner ON memories_long_term(owner_id);
CREATE INDEX IF NOT EXISTS idx_long_term_scope ON memories_long_term(scope);

-- Audit log (append-only; rows may reference deleted memories)
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('write','search','sweep','delete','promote','update_importance')),
    tier TEXT CHECK(tier IS NULL OR tier IN ('short_term','medium_term','long_term')),
    record_id TEXT,
    owner_id TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK(outcome IN ('success','denied','failed')),
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_record ON audit_log(record_id);
CREATE INDEX IF NOT EXISTS idx_audit_owner ON audit_log(owner_id);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
