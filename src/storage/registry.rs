//! Store identifier to adapter lookup.

use std::collections::HashMap;
use std::sync::Arc;

use super::drill::DrillStore;
use super::memory::MemoryStore;
use super::traits::StoreAdapter;
use crate::config::{Config, StoreKind};
use crate::error::Result;

/// Adapters keyed by the store identifier the catalog references.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn StoreAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn StoreAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn StoreAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StoreAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered store names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build one adapter per configured store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for store in &config.stores {
            let adapter: Arc<dyn StoreAdapter> = match store.kind {
                StoreKind::Drill => Arc::new(DrillStore::from_config(
                    store,
                    config.dispatcher.store_timeout_ms,
                )?),
                StoreKind::Memory => match store.data_path() {
                    Some(path) => Arc::new(MemoryStore::from_file(&store.name, &path)?),
                    None => Arc::new(MemoryStore::new(&store.name)),
                },
            };
            tracing::debug!(store = %store.name, kind = ?store.kind, "Registered store adapter");
            registry.register(adapter);
        }
        Ok(registry)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("stores", &self.names())
            .finish()
    }
}
