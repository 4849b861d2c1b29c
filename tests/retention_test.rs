mod helpers;

use std::time::Duration;

use chrono::Utc;
use helpers::{insert_memory, test_embedding};
use mnemos::db::Database;
use mnemos::error::MemoryError;
use mnemos::memory::audit::{self, AuditFilter, AuditOperation, SWEEPER_IDENTITY};
use mnemos::memory::scope::Caller;
use mnemos::memory::sweeper::{self, RetentionSweeper, SweeperTiming};
use mnemos::memory::types::{now_timestamp, Scope, Tier};
use tempfile::TempDir;

/// Two expired rows per expiring tier, one live row each, one long-term row.
fn seed_expired(database: &Database) {
    let mut conn = database.writer();
    let long_ago = Utc::now() - chrono::Duration::days(30);
    for tier in [Tier::ShortTerm, Tier::MediumTerm] {
        insert_memory(
            &mut conn,
            tier,
            "u1",
            Scope::Restricted,
            "stale note",
            &test_embedding(1),
            long_ago,
        );
        insert_memory(
            &mut conn,
            tier,
            "u2",
            Scope::Shared,
            "stale shared note",
            &test_embedding(2),
            long_ago,
        );
        insert_memory(
            &mut conn,
            tier,
            "u1",
            Scope::Restricted,
            "fresh note",
            &test_embedding(3),
            Utc::now(),
        );
    }
    insert_memory(
        &mut conn,
        Tier::LongTerm,
        "u1",
        Scope::Restricted,
        "old but permanent",
        &test_embedding(4),
        long_ago,
    );
}

#[test]
fn sweep_deletes_only_expired_rows_and_is_idempotent() {
    let database = Database::in_memory().unwrap();
    seed_expired(&database);
    let conn = database.writer();
    let now = now_timestamp();

    let first = sweeper::sweep(&conn, &now, false, SWEEPER_IDENTITY);
    assert!(!first.has_failures());
    assert_eq!(first.deleted_in(Tier::ShortTerm), 2);
    assert_eq!(first.deleted_in(Tier::MediumTerm), 2);
    assert_eq!(first.total_deleted, 4);

    let second = sweeper::sweep(&conn, &now, false, SWEEPER_IDENTITY);
    assert_eq!(second.total_deleted, 0);

    for (tier, expected) in [(Tier::ShortTerm, 1), (Tier::MediumTerm, 1), (Tier::LongTerm, 1)] {
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", tier.table()), [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, expected, "{tier} rows left");
    }

    let entries = audit::list(
        &conn,
        &AuditFilter {
            operation: Some(AuditOperation::Sweep),
            owner_id: Some(SWEEPER_IDENTITY.into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(!entries.is_empty(), "sweeps are audited");
}

#[test]
fn dry_run_counts_without_deleting() {
    let database = Database::in_memory().unwrap();
    seed_expired(&database);
    let conn = database.writer();

    let report = sweeper::sweep(&conn, &now_timestamp(), true, SWEEPER_IDENTITY);
    assert!(report.dry_run);
    assert_eq!(report.total_deleted, 0);
    assert_eq!(report.tiers.iter().map(|t| t.eligible).sum::<usize>(), 4);

    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM memories_short_term", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n, 3);
}

#[tokio::test]
async fn expired_records_are_never_returned() {
    let database = Database::in_memory().unwrap();
    let id = {
        let mut conn = database.writer();
        insert_memory(
            &mut conn,
            Tier::ShortTerm,
            "u1",
            Scope::Restricted,
            "prefers dark mode",
            &test_embedding(1),
            Utc::now() - chrono::Duration::days(1),
        )
    };
    let svc = helpers::service_with(database, &Default::default());
    let u1 = Caller::restricted("u1");

    let err = svc.get_memory(&u1, Tier::ShortTerm, &id).await.unwrap_err();
    assert!(matches!(err, MemoryError::Authorization(_)));
    let err = svc
        .get_memory(&Caller::elevated("ops"), Tier::ShortTerm, &id)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));

    let response = svc
        .search_memory(
            &u1,
            mnemos::memory::service::SearchRequest {
                threshold: Some(-1.0),
                ..helpers::search_request("dark mode", 10)
            },
        )
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn manual_sweep_requires_elevation() {
    let svc = helpers::test_service();
    let err = svc
        .sweep_expired(&Caller::restricted("u1"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Authorization(_)));

    let entries = svc
        .audit_history(
            &Caller::elevated("ops"),
            AuditFilter {
                operation: Some(AuditOperation::Sweep),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, "denied");
    assert_eq!(entries[0].owner_id, "u1");
}

#[tokio::test]
async fn background_sweeper_clears_an_on_disk_store() {
    let tmp = TempDir::new().unwrap();
    let database = Database::open(tmp.path().join("sweep.db")).unwrap();
    seed_expired(&database);

    let handle = RetentionSweeper::spawn_with(
        database.clone(),
        SweeperTiming {
            interval: Duration::from_millis(20),
            restart_backoff: Duration::from_millis(20),
        },
        sweeper::default_cycle(),
    );

    let mut cleared = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n: i64 = database
            .reader()
            .query_row(
                "SELECT (SELECT COUNT(*) FROM memories_short_term) + (SELECT COUNT(*) FROM memories_medium_term)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        if n == 2 {
            cleared = true;
            break;
        }
    }
    handle.shutdown().await;

    assert!(cleared, "sweeper never removed the expired rows");
    assert!(handle.status().cycles >= 1);
}
