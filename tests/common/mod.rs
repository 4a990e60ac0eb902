//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use ticket_relay::domain::{ThreadLocation, TicketRef};
use ticket_relay::infra::{LinkStoreConfig, PoolConfig, StoreHandle};
use ticket_relay::relay::{
    CreatedTicket, RelayError, ThreadPoster, TicketRequest, TicketingClient,
};

/// Fresh in-memory SQLite store with migrations applied
pub async fn memory_store() -> StoreHandle {
    memory_store_with(LinkStoreConfig::default()).await
}

pub async fn memory_store_with(links: LinkStoreConfig) -> StoreHandle {
    StoreHandle::connect(&PoolConfig::new("sqlite::memory:"), links)
        .await
        .unwrap()
}

/// File-backed SQLite database with a multi-connection pool.
///
/// Removed from disk when dropped.
pub struct TempDb {
    pub path: PathBuf,
    pub store: StoreHandle,
}

impl TempDb {
    pub async fn new(links: LinkStoreConfig) -> Self {
        let path = std::env::temp_dir().join(format!("ticket-relay-{}.db", Uuid::new_v4()));
        let mut config = PoolConfig::new(format!("sqlite://{}", path.display()));
        config.max_connections = 8;
        let store = StoreHandle::connect(&config, links).await.unwrap();
        Self { path, store }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// Unique key so tests never collide on a shared database
pub fn unique_key(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn ticket_request(thread_key: &str) -> TicketRequest {
    TicketRequest {
        thread_key: thread_key.to_string(),
        channel_ref: "C024BE91L".to_string(),
        subject: "VPN drops every hour".to_string(),
        description: "Started after the client update".to_string(),
        requester: Some("U0G9QF9C6".to_string()),
    }
}

/// Ticketing client handing out sequential references
pub struct FakeTicketing {
    next: AtomicI64,
    pub calls: AtomicU32,
    delay: Duration,
}

impl FakeTicketing {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            next: AtomicI64::new(100),
            calls: AtomicU32::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketingClient for FakeTicketing {
    async fn create_ticket(&self, _request: &TicketRequest) -> Result<CreatedTicket, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedTicket {
            ticket_ref: TicketRef::new(n)
                .ok_or_else(|| RelayError::Ticketing(format!("bad reference {n}")))?,
            url: None,
        })
    }
}

/// Poster that records every message
#[derive(Default)]
pub struct RecordingPoster {
    pub posts: Mutex<Vec<(ThreadLocation, String)>>,
}

impl RecordingPoster {
    pub fn posts(&self) -> Vec<(ThreadLocation, String)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ThreadPoster for RecordingPoster {
    async fn post_reply(&self, location: &ThreadLocation, text: &str) -> Result<(), RelayError> {
        self.posts
            .lock()
            .unwrap()
            .push((location.clone(), text.to_string()));
        Ok(())
    }
}
