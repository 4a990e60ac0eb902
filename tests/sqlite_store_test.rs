//! Link store and event ledger behaviour against SQLite.
//!
//! These run without any external service. The concurrency tests use a
//! file-backed database so claims race over several pooled connections.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{memory_store, memory_store_with, ticket_request, FakeTicketing, RecordingPoster, TempDb};
use ticket_relay::domain::{LinkState, LinkStats, ThreadLocation, TicketRef};
use ticket_relay::infra::{sqlite, LinkStore, LinkStoreConfig};
use ticket_relay::metrics::{metric_names, MetricsRegistry};
use ticket_relay::relay::{MirrorOutcome, TicketOutcome, TicketRelay};

fn ticket(n: i64) -> TicketRef {
    TicketRef::new(n).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_yield_exactly_one_winner() {
    let db = TempDb::new(LinkStoreConfig::default()).await;
    let links = db.store.links();

    let contenders = 16;
    let mut handles = Vec::with_capacity(contenders);
    for _ in 0..contenders {
        let links = links.clone();
        handles.push(tokio::spawn(async move {
            links.claim("1712345678.000200", "C1").await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(
        links.stats().await.unwrap(),
        LinkStats {
            total: 1,
            pending: 1,
            committed: 0
        }
    );
}

#[tokio::test]
async fn commit_applies_only_while_pending() {
    let store = memory_store().await;
    let links = store.links();

    assert!(links.claim("T1", "C1").await.unwrap());
    assert!(links.commit("T1", ticket(42)).await.unwrap());

    assert!(!links.commit("T1", ticket(43)).await.unwrap());
    assert_eq!(
        links.get_ticket_id("T1").await.unwrap(),
        Some(LinkState::Committed(ticket(42)))
    );
}

#[tokio::test]
async fn commit_without_claim_is_rejected() {
    let store = memory_store().await;
    assert!(!store.links().commit("never-claimed", ticket(1)).await.unwrap());
    assert_eq!(store.links().get_ticket_id("never-claimed").await.unwrap(), None);
}

#[tokio::test]
async fn committed_link_supports_forward_and_reverse_lookup() {
    let store = memory_store().await;
    let links = store.links();

    assert!(links.claim("T1", "C-support").await.unwrap());
    assert!(links.commit("T1", ticket(42)).await.unwrap());

    assert_eq!(
        links.get_ticket_id("T1").await.unwrap(),
        Some(LinkState::Committed(ticket(42)))
    );
    assert_eq!(
        links.reverse_lookup(ticket(42)).await.unwrap(),
        Some(ThreadLocation {
            thread_key: "T1".into(),
            channel_ref: "C-support".into(),
        })
    );
    assert_eq!(links.reverse_lookup(ticket(43)).await.unwrap(), None);
}

#[tokio::test]
async fn uncommitted_claim_reports_pending() {
    let store = memory_store().await;
    let links = store.links();

    assert!(links.claim("T1", "C1").await.unwrap());
    assert!(!links.claim("T1", "C1").await.unwrap());
    assert_eq!(
        links.get_ticket_id("T1").await.unwrap(),
        Some(LinkState::Pending)
    );
}

#[tokio::test]
async fn fresh_pending_blocks_until_stale() {
    let store = memory_store_with(LinkStoreConfig::new(Duration::from_millis(200))).await;
    let links = store.links();

    assert!(links.claim("T1", "C1").await.unwrap());
    assert!(!links.claim("T1", "C1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(links.claim("T1", "C1").await.unwrap());
    assert_eq!(links.stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn committed_link_is_never_reclaimed() {
    let store = memory_store_with(LinkStoreConfig::new(Duration::from_millis(50))).await;
    let links = store.links();

    assert!(links.claim("T1", "C1").await.unwrap());
    assert!(links.commit("T1", ticket(5)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!links.claim("T1", "C1").await.unwrap());
    assert_eq!(
        links.get_ticket_id("T1").await.unwrap(),
        Some(LinkState::Committed(ticket(5)))
    );
}

#[tokio::test]
async fn abandoned_claim_is_reclaimed_and_late_commit_rejected() {
    let store = memory_store_with(LinkStoreConfig::new(Duration::from_millis(100))).await;
    let links = store.links();

    // First claimant wins and then stalls
    assert!(links.claim("T2", "C1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Second claimant reclaims and commits
    assert!(links.claim("T2", "C1").await.unwrap());
    assert!(links.commit("T2", ticket(7)).await.unwrap());

    // First claimant finally finishes
    assert!(!links.commit("T2", ticket(6)).await.unwrap());

    assert_eq!(
        links.get_ticket_id("T2").await.unwrap(),
        Some(LinkState::Committed(ticket(7)))
    );
    assert_eq!(
        links.stats().await.unwrap(),
        LinkStats {
            total: 1,
            pending: 0,
            committed: 1
        }
    );
}

#[tokio::test]
async fn mark_processed_is_idempotent() {
    let store = memory_store().await;
    let events = store.events();

    assert!(!events.is_processed("Ev01").await.unwrap());
    assert!(events.mark_processed("Ev01").await.unwrap());
    assert!(events.mark_processed("Ev01").await.unwrap());
    assert!(events.is_processed("Ev01").await.unwrap());
    assert_eq!(events.count().await.unwrap(), 1);
}

#[tokio::test]
async fn delete_older_than_removes_exactly_the_older_rows() {
    let store = memory_store().await;
    let links = store.links();
    let events = store.events();

    for key in ["old-1", "old-2", "old-3"] {
        assert!(links.claim(key, "C1").await.unwrap());
        assert!(events.mark_processed(key).await.unwrap());
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(20)).await;

    for key in ["new-1", "new-2"] {
        assert!(links.claim(key, "C1").await.unwrap());
        assert!(events.mark_processed(key).await.unwrap());
    }

    assert_eq!(links.delete_older_than(cutoff).await.unwrap(), 3);
    assert_eq!(events.delete_older_than(cutoff).await.unwrap(), 3);

    assert_eq!(links.stats().await.unwrap().total, 2);
    assert_eq!(events.count().await.unwrap(), 2);
    assert!(links.get_ticket_id("new-1").await.unwrap().is_some());
    assert!(links.get_ticket_id("old-1").await.unwrap().is_none());
    assert!(events.is_processed("new-2").await.unwrap());
    assert!(!events.is_processed("old-2").await.unwrap());

    assert_eq!(links.delete_older_than(cutoff).await.unwrap(), 0);
}

#[tokio::test]
async fn row_exactly_at_cutoff_is_kept() {
    let pool = sqlite::memory_pool().await.unwrap();
    ticket_relay::migrations::run_sqlite(&pool).await.unwrap();
    let links = sqlite::SqliteLinkStore::new(pool, LinkStoreConfig::default());

    assert!(links.claim("edge", "C1").await.unwrap());
    let created_at = links.get_link("edge").await.unwrap().unwrap().created_at;

    assert_eq!(links.delete_older_than(created_at).await.unwrap(), 0);
    assert!(links.get_ticket_id("edge").await.unwrap().is_some());

    let just_after = created_at + chrono::Duration::microseconds(1);
    assert_eq!(links.delete_older_than(just_after).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_relays_create_a_single_ticket() {
    let db = TempDb::new(LinkStoreConfig::default()).await;
    let ticketing = Arc::new(FakeTicketing::with_delay(Duration::from_millis(50)));
    let poster = Arc::new(RecordingPoster::default());
    let metrics = Arc::new(MetricsRegistry::new());

    let relay = Arc::new(TicketRelay::from_handle(
        &db.store,
        ticketing.clone(),
        poster.clone(),
        metrics.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let relay = relay.clone();
        handles.push(tokio::spawn(async move {
            relay.open_ticket(&ticket_request("T-race")).await.unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            TicketOutcome::Created(_) => created += 1,
            TicketOutcome::InProgress | TicketOutcome::AlreadyLinked(_) => {}
            TicketOutcome::Orphaned(t) => panic!("unexpected orphan {t:?}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ticketing.calls(), 1);
    assert_eq!(metrics.get_counter(metric_names::CLAIMS_WON).await, 1);
    assert_eq!(metrics.get_counter(metric_names::CLAIMS_LOST).await, 7);

    // The announcement went into the originating thread
    let posts = poster.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0.thread_key, "T-race");

    // A later event for the same thread sees the link
    assert_eq!(
        relay.open_ticket(&ticket_request("T-race")).await.unwrap(),
        TicketOutcome::AlreadyLinked(ticket(100))
    );
}

#[tokio::test]
async fn mirrored_update_is_posted_once() {
    let store = memory_store().await;
    let poster = Arc::new(RecordingPoster::default());
    let relay = TicketRelay::from_handle(
        &store,
        Arc::new(FakeTicketing::new()),
        poster.clone(),
        Arc::new(MetricsRegistry::new()),
    );

    let TicketOutcome::Created(created) = relay.open_ticket(&ticket_request("T9")).await.unwrap()
    else {
        panic!("expected a new ticket");
    };

    let first = relay
        .mirror_update("zd-event-1", created.ticket_ref, "Agent: we are on it")
        .await
        .unwrap();
    assert!(matches!(first, MirrorOutcome::Posted(ref loc) if loc.thread_key == "T9"));

    let redelivered = relay
        .mirror_update("zd-event-1", created.ticket_ref, "Agent: we are on it")
        .await
        .unwrap();
    assert_eq!(redelivered, MirrorOutcome::Duplicate);

    let unknown = relay
        .mirror_update("zd-event-2", ticket(999), "nobody listens")
        .await
        .unwrap();
    assert_eq!(unknown, MirrorOutcome::UnknownTicket);
    assert!(!store.events().is_processed("zd-event-2").await.unwrap());

    // Announcement plus one mirrored update
    assert_eq!(poster.posts().len(), 2);
}

#[tokio::test]
async fn update_for_pending_link_is_mirrored_after_commit() {
    let store = memory_store().await;
    let links = store.links();
    let poster = Arc::new(RecordingPoster::default());
    let relay = TicketRelay::from_handle(
        &store,
        Arc::new(FakeTicketing::new()),
        poster.clone(),
        Arc::new(MetricsRegistry::new()),
    );

    assert!(links.claim("T-slow", "C7").await.unwrap());

    let early = relay
        .mirror_update("zd-event-early", ticket(555), "Agent: first reply")
        .await
        .unwrap();
    assert_eq!(early, MirrorOutcome::UnknownTicket);
    assert!(!store.events().is_processed("zd-event-early").await.unwrap());

    assert!(links.commit("T-slow", ticket(555)).await.unwrap());

    let redelivered = relay
        .mirror_update("zd-event-early", ticket(555), "Agent: first reply")
        .await
        .unwrap();
    assert!(matches!(redelivered, MirrorOutcome::Posted(ref loc) if loc.thread_key == "T-slow"));
    assert!(store.events().is_processed("zd-event-early").await.unwrap());
    assert_eq!(poster.posts().len(), 1);
}
