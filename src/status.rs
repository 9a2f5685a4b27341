//! Store connectivity monitor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;

use crate::metrics::get_metrics;
use crate::storage::AdapterRegistry;

/// Pings every registered adapter concurrently under one shared deadline.
#[derive(Debug, Clone)]
pub struct StatusMonitor {
    registry: Arc<AdapterRegistry>,
    deadline: Duration,
}

impl StatusMonitor {
    pub fn new(registry: Arc<AdapterRegistry>, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Store name to reachability. Adapters that have not answered when the
    /// deadline passes are reported unreachable.
    pub async fn check_all(&self) -> BTreeMap<String, bool> {
        let deadline = Instant::now() + self.deadline;
        let mut status: BTreeMap<String, bool> =
            self.registry.names().into_iter().map(|n| (n, false)).collect();

        let mut pings: FuturesUnordered<_> = status
            .keys()
            .filter_map(|name| self.registry.get(name))
            .map(|adapter| async move {
                let up = tokio::time::timeout_at(deadline, adapter.ping())
                    .await
                    .unwrap_or(false);
                (adapter.name().to_string(), up)
            })
            .collect();

        while let Some((name, up)) = pings.next().await {
            status.insert(name, up);
        }

        let metrics = get_metrics();
        for (name, up) in &status {
            metrics.record_store_up(name, *up);
            if !up {
                tracing::warn!(store = %name, "Store unreachable");
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_check_all_memory_stores() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(MemoryStore::new("postgres")))
            .with(Arc::new(MemoryStore::new("mongodb")));
        let monitor = StatusMonitor::new(Arc::new(registry), Duration::from_millis(500));

        let status = monitor.check_all().await;
        assert_eq!(status.len(), 2);
        assert!(status.values().all(|up| *up));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let monitor = StatusMonitor::new(Arc::new(AdapterRegistry::new()), Duration::from_millis(10));
        assert!(monitor.check_all().await.is_empty());
    }
}
