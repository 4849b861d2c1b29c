//! The logical operations of the memory substrate.
//!
//! [`MemoryService`] is what the MCP tools and the CLI call. Every operation
//! takes a resolved [`Caller`]; scope checks happen here before any storage
//! work. Embedding happens before a connection is locked, and all SQLite work
//! runs on the blocking pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{MnemosConfig, RetentionConfig, RetrievalConfig};
use crate::db::Database;
use crate::embedding::EmbeddingGateway;
use crate::error::{MemoryError, Result};
use crate::memory::audit::{self, AuditEntry, AuditEvent, AuditFilter, AuditOperation, AuditOutcome};
use crate::memory::scope::{self, Caller};
use crate::memory::search::{self, SearchHit, SearchParams};
use crate::memory::stats::{self, StatsFilter, StatsResponse};
use crate::memory::store::{self, InsertOutcome};
use crate::memory::sweeper::{self, SweepReport};
use crate::memory::types::{
    now_timestamp, validate_importance, MemoryMetadata, MemoryRecord, NewMemory, Scope,
    Tier,
};

/// A write as received from a surface, before authorization.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Defaults to the caller.
    pub owner_id: Option<String>,
    pub scope: Scope,
    pub tier: Tier,
    pub kind: String,
    pub content: String,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<MemoryMetadata>,
    pub request_token: Option<String>,
}

/// A search as received from a surface.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Empty means every scope the caller may request.
    pub scopes: Vec<Scope>,
    pub kinds: Vec<String>,
    /// Empty means all tiers.
    pub tiers: Vec<Tier>,
    /// Signed so that negative values from callers can be rejected explicitly.
    pub top_k: Option<i64>,
    pub threshold: Option<f64>,
    /// Overrides `retrieval.search_timeout_ms`; 0 disables the deadline.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
}

#[derive(Clone)]
pub struct MemoryService {
    db: Database,
    gateway: Arc<EmbeddingGateway>,
    retrieval: RetrievalConfig,
    retention: RetentionConfig,
}

impl MemoryService {
    pub fn new(db: Database, gateway: Arc<EmbeddingGateway>, config: &MnemosConfig) -> Self {
        Self {
            db,
            gateway,
            retrieval: config.retrieval.clone(),
            retention: config.retention.clone(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    // ── write_memory ─────────────────────────────────────────────────────────

    pub async fn write_memory(&self, caller: &Caller, req: WriteRequest) -> Result<InsertOutcome> {
        let owner_id = req.owner_id.clone().unwrap_or_else(|| caller.id.clone());

        if let Err(e) = scope::authorize_write(caller, &owner_id, req.scope) {
            self.audit_denied(caller, AuditOperation::Write, Some(req.tier), None, &e)
                .await;
            return Err(e);
        }

        let memory = NewMemory {
            tier: req.tier,
            owner_id,
            scope: req.scope,
            kind: req.kind,
            content: req.content,
            importance: req.importance,
            tags: req.tags,
            metadata: req.metadata,
            request_token: req.request_token,
        };
        memory.validate()?;

        tracing::info!(
            content_len = memory.content.len(),
            tier = %memory.tier,
            scope = %memory.scope,
            owner = %memory.owner_id,
            "write_memory called"
        );

        let embedding = self.gateway.embed(&memory.content).await?;

        let db = self.db.clone();
        let retention = self.retention.clone();
        let outcome = run_blocking(move || {
            let mut conn = db.writer();
            store::insert(&mut conn, &memory, &embedding, &retention, chrono::Utc::now())
        })
        .await?;

        tracing::info!(
            id = %outcome.id,
            tier = %outcome.tier,
            replayed = outcome.replayed,
            "memory written"
        );
        Ok(outcome)
    }

    // ── search_memory ────────────────────────────────────────────────────────

    pub async fn search_memory(
        &self,
        caller: &Caller,
        req: SearchRequest,
    ) -> Result<SearchResponse> {
        if req.query.trim().is_empty() {
            return Err(MemoryError::validation("query must not be empty"));
        }
        let top_k = self.resolve_top_k(req.top_k)?;
        let threshold = req.threshold.unwrap_or(self.retrieval.default_threshold);

        let scopes = match scope::authorize_scopes(caller, &req.scopes) {
            Ok(scopes) => scopes,
            Err(e) => {
                self.audit_denied(caller, AuditOperation::Search, None, None, &e)
                    .await;
                return Err(e);
            }
        };

        let params = SearchParams {
            scopes,
            kinds: req.kinds,
            tiers: req.tiers,
            top_k,
            threshold,
            tie_epsilon: self.retrieval.tie_epsilon,
        };
        params.validate()?;

        tracing::info!(caller = %caller.id, top_k, threshold, "search_memory called");

        let query_embedding = self.gateway.embed(&req.query).await?;

        let budget = match req.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => self.retrieval.search_timeout(),
        };

        let mut hits = self
            .run_search(caller.clone(), params.clone(), query_embedding, budget)
            .await?;

        // Completed within the deadline: now the side effects
        let db = self.db.clone();
        let caller_id = caller.id.clone();
        let touched_hits = hits.clone();
        let details = serde_json::json!({
            "tiers": params.tiers.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "top_k": top_k,
            "results": hits.len(),
        });
        let now = now_timestamp();
        let now_for_touch = now.clone();
        let touched = run_blocking(move || {
            let conn = db.writer();
            let touched = match search::touch_long_term_hits(&conn, &touched_hits, &now_for_touch) {
                Ok(n) => n > 0,
                Err(e) => {
                    tracing::warn!(error = %e, "access tracking failed; results unaffected");
                    false
                }
            };
            audit::record_best_effort(
                &conn,
                &AuditEvent::success(AuditOperation::Search, &caller_id).details(details),
            );
            Ok(touched)
        })
        .await?;

        if touched {
            for hit in hits.iter_mut().filter(|h| h.record.tier == Tier::LongTerm) {
                hit.record.access_count = Some(hit.record.access_count.unwrap_or(0) + 1);
                hit.record.last_accessed_at = Some(now.clone());
            }
        }

        tracing::info!(results = hits.len(), "search complete");
        Ok(SearchResponse {
            total: hits.len(),
            results: hits,
        })
    }

    fn resolve_top_k(&self, requested: Option<i64>) -> Result<usize> {
        let top_k = requested.unwrap_or(self.retrieval.default_top_k as i64);
        if top_k <= 0 {
            return Err(MemoryError::validation("top_k must be greater than 0"));
        }
        let top_k = top_k as usize;
        if top_k > self.retrieval.max_top_k {
            return Err(MemoryError::validation(format!(
                "top_k must not exceed {}",
                self.retrieval.max_top_k
            )));
        }
        Ok(top_k)
    }

    /// Read-only part of a search, on the reader connection, bounded by `budget`.
    ///
    /// The deadline travels with the query: it is enforced on whichever
    /// connection the search ends up holding, so a timeout never touches other
    /// requests. A task that gives up while still waiting for the connection
    /// finds the deadline passed once it gets there and returns without reading.
    async fn run_search(
        &self,
        caller: Caller,
        params: SearchParams,
        query_embedding: Vec<f32>,
        budget: Option<Duration>,
    ) -> Result<Vec<SearchHit>> {
        let db = self.db.clone();
        let budget_ms = budget.map(|b| b.as_millis() as u64).unwrap_or(0);
        let deadline = budget.map(|b| (Instant::now() + b, budget_ms));

        let task = run_blocking(move || {
            let conn = db.reader();
            search::search(&conn, &query_embedding, &caller, &params, &now_timestamp(), deadline)
        });

        match budget {
            None => task.await,
            Some(b) => match tokio::time::timeout(b, task).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(budget_ms, "search timed out; query abandoned");
                    Err(MemoryError::Timeout(budget_ms))
                }
            },
        }
    }

    // ── get_stats ────────────────────────────────────────────────────────────

    pub async fn get_stats(
        &self,
        caller: &Caller,
        owner_id: Option<String>,
        tiers: Vec<Tier>,
    ) -> Result<StatsResponse> {
        let db = self.db.clone();
        let caller = caller.clone();
        run_blocking(move || {
            let conn = db.reader();
            let filter = StatsFilter { owner_id, tiers };
            stats::get_stats(&conn, &caller, &filter, &now_timestamp(), db.path())
        })
        .await
    }

    // ── sweep_expired ────────────────────────────────────────────────────────

    pub async fn sweep_expired(&self, caller: &Caller, dry_run: bool) -> Result<SweepReport> {
        if let Err(e) = scope::require_elevated(caller, "sweep_expired") {
            self.audit_denied(caller, AuditOperation::Sweep, None, None, &e)
                .await;
            return Err(e);
        }
        let db = self.db.clone();
        let actor = caller.id.clone();
        let report = run_blocking(move || {
            let conn = db.writer();
            Ok(sweeper::sweep(&conn, &now_timestamp(), dry_run, &actor))
        })
        .await?;
        tracing::info!(dry_run, deleted = report.total_deleted, "sweep_expired complete");
        Ok(report)
    }

    // ── get_memory ───────────────────────────────────────────────────────────

    /// Fetch one record. Missing, expired and invisible records are the same
    /// error for non-elevated callers.
    pub async fn get_memory(&self, caller: &Caller, tier: Tier, id: &str) -> Result<MemoryRecord> {
        let db = self.db.clone();
        let caller = caller.clone();
        let id = id.to_string();
        run_blocking(move || {
            let conn = db.reader();
            let record = store::find_by_id(&conn, tier, &id)?;
            visible_live(record, &caller, &id).map(MemoryRecord::without_embedding)
        })
        .await
    }

    // ── promote ──────────────────────────────────────────────────────────────

    /// Copy a record into a longer-lived tier. The source is left untouched.
    pub async fn promote(
        &self,
        caller: &Caller,
        tier: Tier,
        id: &str,
        target: Tier,
    ) -> Result<InsertOutcome> {
        if target.rank() <= tier.rank() {
            return Err(MemoryError::validation(format!(
                "promotion must target a longer-lived tier than {tier}, got {target}"
            )));
        }

        let db = self.db.clone();
        let caller = caller.clone();
        let source_id = id.to_string();
        let id = id.to_string();
        let retention = self.retention.clone();
        let outcome = run_blocking(move || {
            let mut conn = db.writer();
            let source = store::find_by_id(&conn, tier, &id)?;
            let source = visible_live(source, &caller, &id)?;
            scope::authorize_mutation(&caller, Some(&source))?;

            let memory = promoted_copy(&source, target);
            store::insert_audited(
                &mut conn,
                &memory,
                &source.embedding,
                &retention,
                chrono::Utc::now(),
                AuditOperation::Promote,
                Some(serde_json::json!({
                    "promoted_from": source.id,
                    "source_tier": tier.as_str(),
                    "promoted_by": caller.id,
                })),
            )
        })
        .await?;

        tracing::info!(
            id = %outcome.id,
            source = %source_id,
            from = %tier,
            to = %target,
            "memory promoted"
        );
        Ok(outcome)
    }

    // ── update_importance ────────────────────────────────────────────────────

    pub async fn update_importance(
        &self,
        caller: &Caller,
        tier: Tier,
        id: &str,
        importance: f64,
    ) -> Result<MemoryRecord> {
        validate_importance(importance)?;
        let db = self.db.clone();
        let caller = caller.clone();
        let id = id.to_string();
        run_blocking(move || {
            let conn = db.writer();
            let record = store::find_by_id(&conn, tier, &id)?;
            let record = visible_live(record, &caller, &id)?;
            scope::authorize_mutation(&caller, Some(&record))?;

            store::update_importance(&conn, tier, &id, importance)?;
            audit::record_best_effort(
                &conn,
                &AuditEvent::success(AuditOperation::UpdateImportance, &caller.id)
                    .tier(tier)
                    .record(&id)
                    .details(serde_json::json!({
                        "from": record.importance,
                        "to": importance,
                    })),
            );
            Ok(MemoryRecord {
                importance,
                ..record
            }
            .without_embedding())
        })
        .await
    }

    // ── delete_memory ────────────────────────────────────────────────────────

    /// Administrative hard delete.
    pub async fn delete_memory(
        &self,
        caller: &Caller,
        tier: Tier,
        id: &str,
        reason: Option<String>,
    ) -> Result<()> {
        if let Err(e) = scope::require_elevated(caller, "delete_memory") {
            self.audit_denied(caller, AuditOperation::Delete, Some(tier), Some(id), &e)
                .await;
            return Err(e);
        }
        let db = self.db.clone();
        let actor = caller.id.clone();
        let id = id.to_string();
        run_blocking(move || {
            let conn = db.writer();
            if !store::delete(&conn, tier, &id)? {
                return Err(MemoryError::NotFound(id));
            }
            audit::record_best_effort(
                &conn,
                &AuditEvent::success(AuditOperation::Delete, &actor)
                    .tier(tier)
                    .record(&id)
                    .details(serde_json::json!({ "reason": reason })),
            );
            tracing::info!(id = %id, tier = %tier, "memory deleted");
            Ok(())
        })
        .await
    }

    // ── audit_history ────────────────────────────────────────────────────────

    /// Elevated callers see everything; others only entries under their own id.
    pub async fn audit_history(
        &self,
        caller: &Caller,
        mut filter: AuditFilter,
    ) -> Result<Vec<AuditEntry>> {
        if !caller.is_elevated() {
            match filter.owner_id.as_deref() {
                Some(owner) if owner != caller.id => {
                    return Err(MemoryError::authorization(
                        "audit history of other identities requires elevated privilege",
                    ));
                }
                _ => filter.owner_id = Some(caller.id.clone()),
            }
        }
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.reader();
            audit::list(&conn, &filter)
        })
        .await
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    async fn audit_denied(
        &self,
        caller: &Caller,
        operation: AuditOperation,
        tier: Option<Tier>,
        record_id: Option<&str>,
        error: &MemoryError,
    ) {
        tracing::warn!(
            caller = %caller.id,
            operation = operation.as_str(),
            error = %error,
            "request denied"
        );
        let db = self.db.clone();
        let caller_id = caller.id.clone();
        let record_id = record_id.map(str::to_string);
        let message = error.to_string();
        let _ = run_blocking(move || {
            let conn = db.writer();
            let mut event = AuditEvent::success(operation, &caller_id)
                .outcome(AuditOutcome::Denied)
                .details(serde_json::json!({ "error": message }));
            event.tier = tier;
            event.record_id = record_id.as_deref();
            audit::record_best_effort(&conn, &event);
            Ok(())
        })
        .await;
    }
}

/// Apply visibility and expiry to a looked-up record.
fn visible_live(record: Option<MemoryRecord>, caller: &Caller, id: &str) -> Result<MemoryRecord> {
    let now = now_timestamp();
    match record {
        Some(r) if scope::is_visible(&r, caller) && !r.is_expired_at(&now) => Ok(r),
        None if caller.is_elevated() => Err(MemoryError::NotFound(id.to_string())),
        Some(r) if caller.is_elevated() && r.is_expired_at(&now) => {
            Err(MemoryError::NotFound(id.to_string()))
        }
        _ => Err(scope::not_accessible()),
    }
}

/// The new record a promotion writes. Metadata keys the target tier does not
/// accept are dropped.
fn promoted_copy(source: &MemoryRecord, target: Tier) -> NewMemory {
    let metadata = source.metadata.clone().map(|m| MemoryMetadata {
        source: m.source,
        session_id: if target == Tier::LongTerm { None } else { m.session_id },
        topic: if target == Tier::LongTerm { m.topic } else { None },
    });
    NewMemory {
        tier: target,
        owner_id: source.owner_id.clone(),
        scope: source.scope,
        kind: source.kind.clone(),
        content: source.content.clone(),
        importance: Some(source.importance),
        tags: if target == Tier::LongTerm { source.tags.clone() } else { None },
        metadata: metadata.filter(|m| !m.is_empty()),
        request_token: None,
    }
}

/// Run sync storage work on the blocking pool. A panic inside is re-raised
/// on the calling task.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashed::HashedEmbeddingProvider;
    use crate::embedding::EMBEDDING_DIM;

    fn service() -> MemoryService {
        let db = Database::in_memory().unwrap();
        let config = MnemosConfig::default();
        let gateway = EmbeddingGateway::new(
            Arc::new(HashedEmbeddingProvider::new(EMBEDDING_DIM)),
            &config.embedding,
        );
        MemoryService::new(db, Arc::new(gateway), &config)
    }

    fn write(tier: Tier, scope: Scope, content: &str) -> WriteRequest {
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

    fn query(q: &str) -> SearchRequest {
        SearchRequest {
            query: q.into(),
            threshold: Some(0.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn write_then_get() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let out = svc
            .write_memory(&u1, write(Tier::MediumTerm, Scope::Restricted, "prefers dark mode"))
            .await
            .unwrap();
        let rec = svc.get_memory(&u1, Tier::MediumTerm, &out.id).await.unwrap();
        assert_eq!(rec.content, "prefers dark mode");
        assert_eq!(rec.owner_id, "u1");
    }

    #[tokio::test]
    async fn full_scope_write_without_privilege_is_denied_and_audited() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let err = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Full, "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Authorization(_)));

        let admin = Caller::elevated("admin");
        let entries = svc.audit_history(&admin, AuditFilter::default()).await.unwrap();
        assert_eq!(entries[0].outcome, "denied");
    }

    #[tokio::test]
    async fn other_callers_get_same_error_for_missing_and_private() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let out = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "private"))
            .await
            .unwrap();
        let u2 = Caller::restricted("u2");
        let private = svc.get_memory(&u2, Tier::LongTerm, &out.id).await.unwrap_err();
        let missing = svc.get_memory(&u2, Tier::LongTerm, "no-such-id").await.unwrap_err();
        assert_eq!(private.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn search_validation() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        assert!(matches!(
            svc.search_memory(&u1, query("  ")).await,
            Err(MemoryError::Validation(_))
        ));
        let mut q = query("x");
        q.top_k = Some(-1);
        assert!(matches!(svc.search_memory(&u1, q).await, Err(MemoryError::Validation(_))));
        let mut q = query("x");
        q.scopes = vec![Scope::Full];
        assert!(matches!(svc.search_memory(&u1, q).await, Err(MemoryError::Authorization(_))));
    }

    #[tokio::test]
    async fn search_bumps_access_count_on_long_term_hits() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let dark = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "user prefers dark mode"))
            .await
            .unwrap();
        svc.write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "user drinks green tea"))
            .await
            .unwrap();

        let mut q = query("dark mode");
        q.top_k = Some(1);
        let resp = svc.search_memory(&u1, q).await.unwrap();
        assert_eq!(resp.total, 1);
        assert_eq!(resp.results[0].record.id, dark.id);
        assert_eq!(resp.results[0].record.access_count, Some(1));

        let rec = svc.get_memory(&u1, Tier::LongTerm, &dark.id).await.unwrap();
        assert_eq!(rec.access_count, Some(1));
    }

    const SLOW_READ: &str = "WITH RECURSIVE c(x) AS \
        (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000) SELECT count(*) FROM c";

    /// Occupy the reader connection from another thread with a long query,
    /// keeping it for at least `hold`. Returns once the connection is taken.
    fn busy_reader(
        db: &Database,
        hold: Duration,
    ) -> std::thread::JoinHandle<rusqlite::Result<i64>> {
        let db = db.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let conn = db.reader();
            locked_tx.send(()).unwrap();
            let started = Instant::now();
            let result = conn.query_row(SLOW_READ, [], |r| r.get(0));
            if let Some(rest) = hold.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
            result
        });
        locked_rx.recv().unwrap();
        handle
    }

    async fn search_audit_rows(svc: &MemoryService) -> usize {
        let filter = AuditFilter {
            operation: Some(AuditOperation::Search),
            ..Default::default()
        };
        svc.audit_history(&Caller::elevated("admin"), filter)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn timed_out_search_leaves_no_trace() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let dark = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "user prefers dark mode"))
            .await
            .unwrap();

        let busy = busy_reader(svc.database(), Duration::from_millis(300));
        let mut q = query("dark mode");
        q.timeout_ms = Some(50);
        let err = svc.search_memory(&u1, q).await.unwrap_err();
        assert!(matches!(err, MemoryError::Timeout(50)), "{err}");

        // The other reader's statement ran to completion
        assert_eq!(busy.join().unwrap().unwrap(), 1_000_000);

        let rec = svc.get_memory(&u1, Tier::LongTerm, &dark.id).await.unwrap();
        assert_eq!(rec.access_count, Some(0));
        assert!(rec.last_accessed_at.is_none());
        assert_eq!(search_audit_rows(&svc).await, 0);
    }

    #[tokio::test]
    async fn timeout_of_one_search_spares_concurrent_searches() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let dark = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "user prefers dark mode"))
            .await
            .unwrap();

        let busy = busy_reader(svc.database(), Duration::from_millis(300));
        let mut hasty = query("dark mode");
        hasty.timeout_ms = Some(50);
        let mut patient = query("dark mode");
        patient.timeout_ms = Some(10_000);

        let (hasty, patient) = tokio::join!(
            svc.search_memory(&u1, hasty),
            svc.search_memory(&u1, patient)
        );
        assert!(matches!(hasty, Err(MemoryError::Timeout(50))));
        let patient = patient.unwrap();
        assert_eq!(patient.total, 1);
        assert_eq!(patient.results[0].record.id, dark.id);
        assert_eq!(busy.join().unwrap().unwrap(), 1_000_000);

        // Only the completed search touched the record and was audited
        let rec = svc.get_memory(&u1, Tier::LongTerm, &dark.id).await.unwrap();
        assert_eq!(rec.access_count, Some(1));
        assert_eq!(search_audit_rows(&svc).await, 1);
    }

    #[tokio::test]
    async fn promote_copies_into_longer_tier() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let src = svc
            .write_memory(&u1, write(Tier::ShortTerm, Scope::Shared, "standup at 10am"))
            .await
            .unwrap();
        let promoted = svc
            .promote(&u1, Tier::ShortTerm, &src.id, Tier::LongTerm)
            .await
            .unwrap();
        assert_ne!(promoted.id, src.id);
        assert!(promoted.expires_at.is_none());

        let copy = svc.get_memory(&u1, Tier::LongTerm, &promoted.id).await.unwrap();
        assert_eq!(copy.content, "standup at 10am");
        assert_eq!(copy.scope, Scope::Shared);
        // source untouched
        assert!(svc.get_memory(&u1, Tier::ShortTerm, &src.id).await.is_ok());

        let history = svc
            .audit_history(
                &u1,
                AuditFilter {
                    record_id: Some(promoted.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(history[0].operation, "promote");
        assert_eq!(history[0].details.as_ref().unwrap()["promoted_from"], src.id.as_str());

        assert!(matches!(
            svc.promote(&u1, Tier::LongTerm, &promoted.id, Tier::ShortTerm).await,
            Err(MemoryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn importance_update_requires_ownership() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let out = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Shared, "shared fact"))
            .await
            .unwrap();
        let err = svc
            .update_importance(&Caller::restricted("u2"), Tier::LongTerm, &out.id, 0.9)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Authorization(_)));

        let rec = svc
            .update_importance(&u1, Tier::LongTerm, &out.id, 0.9)
            .await
            .unwrap();
        assert_eq!(rec.importance, 0.9);
    }

    #[tokio::test]
    async fn delete_and_sweep_require_elevation() {
        let svc = service();
        let u1 = Caller::restricted("u1");
        let out = svc
            .write_memory(&u1, write(Tier::LongTerm, Scope::Restricted, "to delete"))
            .await
            .unwrap();
        assert!(svc.delete_memory(&u1, Tier::LongTerm, &out.id, None).await.is_err());
        assert!(svc.sweep_expired(&u1, true).await.is_err());

        let admin = Caller::elevated("admin");
        svc.delete_memory(&admin, Tier::LongTerm, &out.id, Some("gdpr request".into()))
            .await
            .unwrap();
        assert!(matches!(
            svc.get_memory(&admin, Tier::LongTerm, &out.id).await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            svc.delete_memory(&admin, Tier::LongTerm, &out.id, None).await,
            Err(MemoryError::NotFound(_))
        ));
        let report = svc.sweep_expired(&admin, false).await.unwrap();
        assert_eq!(report.total_deleted, 0);
    }

    #[tokio::test]
    async fn audit_history_is_limited_to_own_entries() {
        let svc = service();
        svc.write_memory(&Caller::restricted("u1"), write(Tier::ShortTerm, Scope::Restricted, "a"))
            .await
            .unwrap();
        svc.write_memory(&Caller::restricted("u2"), write(Tier::ShortTerm, Scope::Restricted, "b"))
            .await
            .unwrap();

        let u1 = Caller::restricted("u1");
        let own = svc.audit_history(&u1, AuditFilter::default()).await.unwrap();
        assert!(own.iter().all(|e| e.owner_id == "u1"));
        assert_eq!(own.len(), 1);

        let foreign = AuditFilter {
            owner_id: Some("u2".into()),
            ..Default::default()
        };
        assert!(svc.audit_history(&u1, foreign).await.is_err());
    }
}
