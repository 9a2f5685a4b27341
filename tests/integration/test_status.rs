//! Store status under a shared ping deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ecofed::error::StorageError;
use ecofed::{AdapterRegistry, MemoryStore, RawRow, StatusMonitor, StoreAdapter, StoreQuery};

/// Adapter whose ping never completes.
struct HungStore;

#[async_trait]
impl StoreAdapter for HungStore {
    fn name(&self) -> &str {
        "hung"
    }

    async fn query(&self, _query: StoreQuery) -> Result<Vec<RawRow>, StorageError> {
        Err(StorageError::Connection("unreachable".to_string()))
    }

    async fn ping(&self) -> bool {
        std::future::pending::<()>().await;
        true
    }
}

#[tokio::test]
async fn test_hung_ping_is_cut_off_at_deadline() {
    let registry = AdapterRegistry::new()
        .with(Arc::new(HungStore))
        .with(Arc::new(MemoryStore::new("postgres")));
    let monitor = StatusMonitor::new(Arc::new(registry), Duration::from_millis(200));

    let started = Instant::now();
    let status = monitor.check_all().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    assert_eq!(status.get("hung"), Some(&false));
    assert_eq!(status.get("postgres"), Some(&true));
}

#[tokio::test]
async fn test_every_store_is_reported() {
    let registry = AdapterRegistry::new()
        .with(Arc::new(HungStore))
        .with(Arc::new(MemoryStore::new("mongodb")))
        .with(Arc::new(MemoryStore::new("drill")));
    let monitor = StatusMonitor::new(Arc::new(registry), Duration::from_millis(50));

    let status = monitor.check_all().await;
    let names: Vec<&str> = status.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["drill", "hung", "mongodb"]);
}
