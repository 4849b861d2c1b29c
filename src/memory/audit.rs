//! Append-only audit recorder.
//!
//! Every mutating or search operation appends one row to `audit_log`. The table
//! rejects UPDATE and DELETE at the SQLite level, and its rows may outlive the
//! memories they reference.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::types::{now_timestamp, Tier};

/// Identity recorded for work done by the retention sweeper.
pub const SWEEPER_IDENTITY: &str = "system:sweeper";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Write,
    Search,
    Sweep,
    Delete,
    Promote,
    UpdateImportance,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Search => "search",
            Self::Sweep => "sweep",
            Self::Delete => "delete",
            Self::Promote => "promote",
            Self::UpdateImportance => "update_importance",
        }
    }
}

impl std::str::FromStr for AuditOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "write" => Ok(Self::Write),
            "search" => Ok(Self::Search),
            "sweep" => Ok(Self::Sweep),
            "delete" => Ok(Self::Delete),
            "promote" => Ok(Self::Promote),
            "update_importance" => Ok(Self::UpdateImportance),
            _ => Err(format!("unknown audit operation: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Failed => "failed",
        }
    }
}

/// One audit append.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub operation: AuditOperation,
    pub tier: Option<Tier>,
    pub record_id: Option<&'a str>,
    pub owner_id: &'a str,
    pub outcome: AuditOutcome,
    pub details: Option<serde_json::Value>,
}

impl<'a> AuditEvent<'a> {
    pub fn success(operation: AuditOperation, owner_id: &'a str) -> Self {
        Self {
            operation,
            tier: None,
            record_id: None,
            owner_id,
            outcome: AuditOutcome::Success,
            details: None,
        }
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn record(mut self, record_id: &'a str) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append an audit row. Returns its sequence number.
pub fn record(conn: &Connection, event: &AuditEvent<'_>) -> Result<i64> {
    let details_json = event.details.as_ref().map(|d| d.to_string());
    conn.execute(
        "INSERT INTO audit_log (operation, tier, record_id, owner_id, outcome, details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.operation.as_str(),
            event.tier.map(|t| t.as_str()),
            event.record_id,
            event.owner_id,
            event.outcome.as_str(),
            details_json,
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Append an audit row, logging instead of failing. Audit completeness never
/// outranks the operation being audited.
pub fn record_best_effort(conn: &Connection, event: &AuditEvent<'_>) {
    if let Err(e) = record(conn, event) {
        tracing::warn!(
            operation = event.operation.as_str(),
            record_id = event.record_id.unwrap_or("-"),
            error = %e,
            "audit append failed"
        );
    }
}

/// A stored audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub seq: i64,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub owner_id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub record_id: Option<String>,
    pub owner_id: Option<String>,
    pub operation: Option<AuditOperation>,
    pub limit: Option<usize>,
}

const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Most recent entries first.
pub fn list(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut clauses = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(ref id) = filter.record_id {
        values.push(id.clone());
        clauses.push(format!("record_id = ?{}", values.len()));
    }
    if let Some(ref owner) = filter.owner_id {
        values.push(owner.clone());
        clauses.push(format!("owner_id = ?{}", values.len()));
    }
    if let Some(op) = filter.operation {
        values.push(op.as_str().to_string());
        clauses.push(format!("operation = ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    let sql = format!(
        "SELECT id, operation, tier, record_id, owner_id, outcome, details, created_at \
         FROM audit_log {where_clause} ORDER BY id DESC LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        values.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect();
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let details: Option<String> = row.get(6)?;
            Ok(AuditEntry {
                seq: row.get(0)?,
                operation: row.get(1)?,
                tier: row.get(2)?,
                record_id: row.get(3)?,
                owner_id: row.get(4)?,
                outcome: row.get(5)?,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
