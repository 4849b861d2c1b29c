//! Aggregate statistics over `memory_stats_view`.
//!
//! Counts only rows the caller can see and that have not expired. Rows that
//! are past expiry but not yet swept are reported separately as
//! `pending_sweep`.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::path::Path;

use crate::error::Result;
use crate::memory::scope::{self, Caller};
use crate::memory::types::Tier;

/// Response from get_stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsResponse {
    pub short_term_count: u64,
    pub medium_term_count: u64,
    pub long_term_count: u64,
    pub total: u64,
    pub unique_owners: u64,
    /// `None` when no rows match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_importance: Option<f64>,
    /// Expired rows still waiting for the sweeper.
    pub pending_sweep: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_size_bytes: Option<u64>,
}

/// Filters for [`get_stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub owner_id: Option<String>,
    /// Empty means all tiers.
    pub tiers: Vec<Tier>,
}

/// Compute statistics visible to `caller`.
///
/// `db_path` is used for file size; pass None for in-memory databases.
pub fn get_stats(
    conn: &Connection,
    caller: &Caller,
    filter: &StatsFilter,
    now: &str,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let (base_where, mut values) = base_filter(caller, filter);

    values.push(Value::Text(now.to_string()));
    let now_idx = values.len();
    let live = format!("{base_where} AND (expires_at IS NULL OR expires_at > ?{now_idx})");
    let pending = format!("{base_where} AND expires_at <= ?{now_idx}");

    let mut stats = StatsResponse::default();

    // 1. Per-tier counts
    let mut stmt = conn.prepare(&format!(
        "SELECT tier, COUNT(*) FROM memory_stats_view WHERE {live} GROUP BY tier"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (tier, count) in rows {
        let count = count as u64;
        match tier.parse::<Tier>() {
            Ok(Tier::ShortTerm) => stats.short_term_count = count,
            Ok(Tier::MediumTerm) => stats.medium_term_count = count,
            Ok(Tier::LongTerm) => stats.long_term_count = count,
            Err(e) => tracing::warn!(error = %e, "unexpected tier in stats view"),
        }
    }
    stats.total = stats.short_term_count + stats.medium_term_count + stats.long_term_count;

    // 2. Owners and importance
    let (owners, avg): (i64, Option<f64>) = conn.query_row(
        &format!(
            "SELECT COUNT(DISTINCT owner_id), AVG(importance) FROM memory_stats_view WHERE {live}"
        ),
        params_from_iter(values.iter()),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    stats.unique_owners = owners as u64;
    stats.average_importance = avg;

    // 3. Awaiting sweep
    let pending_count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM memory_stats_view WHERE {pending}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;
    stats.pending_sweep = pending_count as u64;

    stats.db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len());

    Ok(stats)
}

/// Visibility, owner and tier filters with their bound values.
fn base_filter(caller: &Caller, filter: &StatsFilter) -> (String, Vec<Value>) {
    let mut values = vec![
        Value::Text(caller.id.clone()),
        Value::Integer(i64::from(caller.is_elevated())),
    ];
    let mut clauses = vec![scope::visibility_clause(1, 2)];

    if let Some(ref owner) = filter.owner_id {
        values.push(Value::Text(owner.clone()));
        clauses.push(format!("owner_id = ?{}", values.len()));
    }
    if !filter.tiers.is_empty() {
        let placeholders: Vec<String> = filter
            .tiers
            .iter()
            .map(|t| {
                values.push(Value::Text(t.as_str().to_string()));
                format!("?{}", values.len())
            })
            .collect();
        clauses.push(format!("tier IN ({})", placeholders.join(", ")));
    }
    (clauses.join(" AND "), values)
}
