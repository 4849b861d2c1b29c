mod helpers;

use chrono::{Duration, Utc};
use helpers::{blended_embedding, insert_memory, test_embedding};
use mnemos::db::Database;
use mnemos::error::MemoryError;
use mnemos::memory::scope::Caller;
use mnemos::memory::search::{self, SearchParams};
use mnemos::memory::service::SearchRequest;
use mnemos::memory::store;
use mnemos::memory::types::{now_timestamp, Scope, Tier};

fn params(top_k: usize, threshold: f64) -> SearchParams {
    SearchParams {
        scopes: Scope::ALL.to_vec(),
        kinds: vec![],
        tiers: vec![],
        top_k,
        threshold,
        tie_epsilon: 1e-6,
    }
}

/// Records spread across tiers, several with identical similarity.
fn seeded() -> Database {
    let database = Database::in_memory().unwrap();
    let mut conn = database.writer();
    let base = Utc::now() - Duration::hours(1);
    let mut minute = 0;
    let mut at = || {
        minute += 1;
        base + Duration::minutes(minute)
    };
    for tier in [Tier::ShortTerm, Tier::MediumTerm, Tier::LongTerm] {
        insert_memory(&mut conn, tier, "u1", Scope::Restricted, "exact", &test_embedding(0), at());
        insert_memory(
            &mut conn,
            tier,
            "u1",
            Scope::Restricted,
            "close",
            &blended_embedding(0, 1, 0.9),
            at(),
        );
        insert_memory(
            &mut conn,
            tier,
            "u2",
            Scope::Shared,
            "shared close",
            &blended_embedding(0, 2, 0.9),
            at(),
        );
        insert_memory(
            &mut conn,
            tier,
            "u1",
            Scope::Restricted,
            "far",
            &blended_embedding(0, 3, 0.2),
            at(),
        );
    }
    drop(conn);
    database
}

#[test]
fn repeated_searches_return_identical_order() {
    let database = seeded();
    let conn = database.reader();
    let caller = Caller::restricted("u1");
    let now = now_timestamp();

    let first = search::search(&conn, &test_embedding(0), &caller, &params(20, 0.0), &now, None)
        .unwrap();
    for _ in 0..5 {
        let again = search::search(&conn, &test_embedding(0), &caller, &params(20, 0.0), &now, None)
            .unwrap();
        let a: Vec<&str> = first.iter().map(|h| h.record.id.as_str()).collect();
        let b: Vec<&str> = again.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(a, b);
    }
}

#[test]
fn results_are_sorted_and_thresholded() {
    let database = seeded();
    let conn = database.reader();
    let caller = Caller::restricted("u1");

    let hits = search::search(
        &conn,
        &test_embedding(0),
        &caller,
        &params(20, 0.5),
        &now_timestamp(),
        None,
    )
    .unwrap();
    assert_eq!(hits.len(), 9, "three exact, six close; far is below threshold");
    assert!(hits.iter().all(|h| h.similarity >= 0.5));
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity - 1e-6));
    assert!(hits[..3].iter().all(|h| h.record.content == "exact"));

    // Equal similarity and importance: newest first
    let exact: Vec<&str> = hits[..3].iter().map(|h| h.record.created_at.as_str()).collect();
    let mut sorted = exact.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(exact, sorted);
}

#[test]
fn top_k_truncates_after_merging_tiers() {
    let database = seeded();
    let conn = database.reader();
    let hits = search::search(
        &conn,
        &test_embedding(0),
        &Caller::restricted("u1"),
        &params(2, 0.0),
        &now_timestamp(),
        None,
    )
    .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.record.content == "exact"));
    // The newest exact match lives in the long-term tier
    assert_eq!(hits[0].record.tier, Tier::LongTerm);
}

#[test]
fn importance_breaks_similarity_ties() {
    let database = seeded();
    let id = {
        let conn = database.reader();
        let hits = search::search(
            &conn,
            &test_embedding(0),
            &Caller::restricted("u1"),
            &params(3, 0.9),
            &now_timestamp(),
            None,
        )
        .unwrap();
        hits.last().unwrap().record.clone()
    };
    {
        let conn = database.writer();
        assert!(store::update_importance(&conn, id.tier, &id.id, 1.0).unwrap());
    }
    let conn = database.reader();
    let hits = search::search(
        &conn,
        &test_embedding(0),
        &Caller::restricted("u1"),
        &params(3, 0.9),
        &now_timestamp(),
        None,
    )
    .unwrap();
    assert_eq!(hits[0].record.id, id.id);
}

#[tokio::test]
async fn top_k_bounds_are_enforced() {
    let svc = helpers::test_service();
    let u1 = Caller::restricted("u1");

    for top_k in [0, -3, 10_000] {
        let err = svc
            .search_memory(&u1, helpers::search_request("anything", top_k))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)), "top_k={top_k}");
    }

    let err = svc
        .search_memory(
            &u1,
            SearchRequest {
                threshold: Some(1.5),
                ..helpers::search_request("anything", 5)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation(_)));
}
