//! Similarity search across tiers.
//!
//! Each tier is queried on its own with the visibility predicate, expiry, scope
//! and kind filters pushed into SQL. Per-tier results are merged and re-sorted
//! with the same key the SQL used:
//!
//! 1. similarity, quantized into buckets of width `tie_epsilon`, descending
//! 2. importance descending
//! 3. `created_at` descending
//! 4. id ascending
//!
//! Quantizing (rather than comparing `|a - b| < eps`) keeps the order
//! transitive, so repeated searches over the same data rank identically.
//!
//! The functions here never mutate. Access tracking on long-term hits is a
//! separate step ([`touch_long_term_hits`]) that the service runs only after a
//! search has completed inside its deadline.

use std::cmp::Ordering;
use std::time::Instant;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode};
use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::memory::scope::{self, Caller};
use crate::memory::store::{self, map_record, record_columns, RECORD_COLUMN_COUNT};
use crate::memory::types::{MemoryRecord, Scope, Tier};

/// Resolved search parameters. Scopes must already be authorized for the caller.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub scopes: Vec<Scope>,
    /// Empty means any kind.
    pub kinds: Vec<String>,
    /// Empty means all tiers.
    pub tiers: Vec<Tier>,
    pub top_k: usize,
    pub threshold: f64,
    pub tie_epsilon: f64,
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(MemoryError::validation("top_k must be greater than 0"));
        }
        if !self.threshold.is_finite() || !(-1.0..=1.0).contains(&self.threshold) {
            return Err(MemoryError::validation("threshold must be between -1.0 and 1.0"));
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon <= 0.0 {
            return Err(MemoryError::validation("tie_epsilon must be positive"));
        }
        if self.scopes.is_empty() {
            return Err(MemoryError::validation("no scopes to search"));
        }
        Ok(())
    }

    fn tiers(&self) -> Vec<Tier> {
        if self.tiers.is_empty() {
            return Tier::ALL.to_vec();
        }
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            if !tiers.contains(tier) {
                tiers.push(*tier);
            }
        }
        tiers
    }
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub similarity: f64,
}

/// SQLite VM steps between deadline checks while a statement runs.
const DEADLINE_CHECK_OPS: i32 = 1000;

/// Aborts statements on one connection once `at` has passed. The handler is
/// removed on drop, so other users of the connection are never affected.
struct DeadlineGuard<'c> {
    conn: &'c Connection,
}

impl<'c> DeadlineGuard<'c> {
    fn install(conn: &'c Connection, at: Instant) -> rusqlite::Result<Self> {
        conn.progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= at))?;
        Ok(Self { conn })
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.progress_handler(0, None::<fn() -> bool>) {
            tracing::warn!(error = %e, "failed to clear search deadline");
        }
    }
}

/// Run the search against a snapshot of `conn`.
///
/// `deadline` is checked before each tier query and, while a tier query runs,
/// by a progress handler on `conn`. Either way an expired deadline yields
/// [`MemoryError::Timeout`] and no results.
pub fn search(
    conn: &Connection,
    query_embedding: &[f32],
    caller: &Caller,
    params: &SearchParams,
    now: &str,
    deadline: Option<(Instant, u64)>,
) -> Result<Vec<SearchHit>> {
    params.validate()?;
    store::validate_embedding(query_embedding)?;

    // All tiers read from one snapshot
    let tx = conn.unchecked_transaction()?;
    // Declared after `tx` so it is removed before the snapshot ends
    let watchdog = deadline
        .map(|(at, _)| DeadlineGuard::install(conn, at))
        .transpose()?;

    let mut hits = Vec::new();
    for tier in params.tiers() {
        if let Some((at, budget_ms)) = deadline {
            if Instant::now() >= at {
                return Err(MemoryError::Timeout(budget_ms));
            }
        }
        let tier_hits = search_tier(&tx, tier, query_embedding, caller, params, now)
            .map_err(|e| match (deadline, e) {
                (Some((_, budget_ms)), MemoryError::Storage(err))
                    if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
                {
                    MemoryError::Timeout(budget_ms)
                }
                (_, e) => e,
            })?;
        tracing::trace!(tier = %tier, hits = tier_hits.len(), "tier searched");
        hits.extend(tier_hits);
    }
    drop(watchdog);
    drop(tx);

    rank(&mut hits, params.tie_epsilon);
    hits.truncate(params.top_k);
    Ok(hits)
}

fn search_tier(
    conn: &Connection,
    tier: Tier,
    query_embedding: &[f32],
    caller: &Caller,
    params: &SearchParams,
    now: &str,
) -> Result<Vec<SearchHit>> {
    let mut values: Vec<Value> = vec![
        Value::Blob(super::embedding_to_bytes(query_embedding).to_vec()),
        Value::Real(params.threshold),
        Value::Real(params.tie_epsilon),
        Value::Integer(params.top_k as i64),
        Value::Text(caller.id.clone()),
        Value::Integer(i64::from(caller.is_elevated())),
    ];

    let mut filters = vec![scope::visibility_clause(5, 6)];

    if tier.expires() {
        values.push(Value::Text(now.to_string()));
        filters.push(format!("expires_at > ?{}", values.len()));
    }

    filters.push(in_clause("scope", &mut values, params.scopes.iter().map(|s| s.as_str())));
    if !params.kinds.is_empty() {
        filters.push(in_clause("kind", &mut values, params.kinds.iter().map(String::as_str)));
    }

    let sql = format!(
        "SELECT * FROM ( \
             SELECT {cols}, 1.0 - vec_distance_cosine(embedding, ?1) AS similarity \
             FROM {table} WHERE {filters} \
         ) WHERE similarity >= ?2 \
         ORDER BY ROUND(similarity / ?3) DESC, importance DESC, created_at DESC, id ASC \
         LIMIT ?4",
        cols = record_columns(tier),
        table = tier.table(),
        filters = filters.join(" AND "),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(SearchHit {
                record: map_record(tier, row)?,
                similarity: row.get(RECORD_COLUMN_COUNT)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // SQL already filtered; this is the second, independent check
    Ok(rows
        .into_iter()
        .filter(|hit| scope::is_visible(&hit.record, caller) && !hit.record.is_expired_at(now))
        .map(|hit| SearchHit {
            record: hit.record.without_embedding(),
            similarity: hit.similarity,
        })
        .collect())
}

fn in_clause<'a>(
    column: &str,
    values: &mut Vec<Value>,
    items: impl Iterator<Item = &'a str>,
) -> String {
    let placeholders: Vec<String> = items
        .map(|item| {
            values.push(Value::Text(item.to_string()));
            format!("?{}", values.len())
        })
        .collect();
    format!("{column} IN ({})", placeholders.join(", "))
}

fn similarity_bucket(similarity: f64, eps: f64) -> i64 {
    (similarity / eps).round() as i64
}

fn compare_hits(a: &SearchHit, b: &SearchHit, eps: f64) -> Ordering {
    similarity_bucket(b.similarity, eps)
        .cmp(&similarity_bucket(a.similarity, eps))
        .then_with(|| b.record.importance.total_cmp(&a.record.importance))
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Sort hits into final rank order.
pub fn rank(hits: &mut [SearchHit], tie_epsilon: f64) {
    hits.sort_by(|a, b| compare_hits(a, b, tie_epsilon));
}

/// Bump access counters on the long-term hits of a completed search.
pub fn touch_long_term_hits(conn: &Connection, hits: &[SearchHit], now: &str) -> Result<usize> {
    let ids: Vec<&str> = hits
        .iter()
        .filter(|h| h.record.tier == Tier::LongTerm)
        .map(|h| h.record.id.as_str())
        .collect();
    store::record_access(conn, &ids, now)
}
