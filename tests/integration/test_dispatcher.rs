//! Dispatch through the executor: permissions, timeouts and merging.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ecofed::catalog::{DRILL, MONGODB, POSTGRES};
use ecofed::error::StorageError;
use ecofed::{
    AdapterRegistry, AggregateFunction, AggregationSpec, Config, MemoryStore, Operation,
    QueryError, QueryExecutor, QueryIntent, RawRow, Role, SchemaCatalog, StoreAdapter,
    StoreQuery,
};
use serde_json::json;

fn rows(values: Vec<serde_json::Value>) -> Vec<RawRow> {
    values
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

fn executor(registry: AdapterRegistry, config: &Config) -> QueryExecutor {
    QueryExecutor::with_registry(
        Arc::new(SchemaCatalog::builtin()),
        Arc::new(registry),
        config,
    )
}

/// Adapter that never answers in time.
struct SlowStore {
    name: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl StoreAdapter for SlowStore {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, _query: StoreQuery) -> Result<Vec<RawRow>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Adapter that fails every sub-query at once.
struct FailingStore {
    name: &'static str,
}

#[async_trait]
impl StoreAdapter for FailingStore {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, _query: StoreQuery) -> Result<Vec<RawRow>, StorageError> {
        Err(StorageError::Connection("connection refused".into()))
    }

    async fn ping(&self) -> bool {
        false
    }
}

fn region_air_quality_intent() -> QueryIntent {
    QueryIntent {
        entity: "Region".into(),
        joined: vec!["AirQuality".into()],
        operation: Operation::Aggregate,
        filters: vec![],
        aggregation: Some(AggregationSpec {
            function: AggregateFunction::Max,
            field: Some("AirQuality.aqi".into()),
            group_by: Some("region_name".into()),
        }),
        limit: None,
        confidence: 1.0,
    }
}

#[tokio::test]
async fn test_forbidden_query_never_reaches_a_store() {
    let spy = Arc::new(MemoryStore::new(DRILL));
    let registry = AdapterRegistry::new().with(spy.clone());
    let executor = executor(registry, &Config::default());

    let err = executor
        .execute("average co2 level in sensor readings", Role::DataProvider)
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Forbidden { .. }));
    assert_eq!(err.code(), "forbidden");
    assert_eq!(spy.request_count(), 0);
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let slow = Arc::new(SlowStore {
        name: POSTGRES,
        calls: AtomicUsize::new(0),
    });
    let mut config = Config::default();
    config.dispatcher.store_timeout_ms = 100;
    let executor = executor(AdapterRegistry::new().with(slow.clone()), &config);

    let started = Instant::now();
    let err = executor
        .execute("average temperature in Amazon Basin", Role::Researcher)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    match err {
        QueryError::StoreUnavailable { store, .. } => assert_eq!(store, POSTGRES),
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_slow_store_fails_a_cross_store_query() {
    let postgres = MemoryStore::new(POSTGRES).with_rows(
        "region_info",
        rows(vec![
            json!({"region_id": 1, "region_name": "Amazon Basin", "latitude": -3.4, "longitude": -62.2}),
        ]),
    );
    let slow = Arc::new(SlowStore {
        name: MONGODB,
        calls: AtomicUsize::new(0),
    });
    let mut config = Config::default();
    config.dispatcher.store_timeout_ms = 100;
    let registry = AdapterRegistry::new().with(Arc::new(postgres)).with(slow);
    let executor = executor(registry, &config);

    let plan = executor
        .dispatcher()
        .plan(&region_air_quality_intent())
        .unwrap();
    assert!(plan.is_federated());

    let started = Instant::now();
    let err = executor.dispatcher().run(plan).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(err, QueryError::StoreUnavailable { .. }));
}

#[tokio::test]
async fn test_first_store_error_fails_without_waiting_for_slow_store() {
    let slow = Arc::new(SlowStore {
        name: MONGODB,
        calls: AtomicUsize::new(0),
    });
    let mut config = Config::default();
    config.dispatcher.store_timeout_ms = 10_000;
    let registry = AdapterRegistry::new()
        .with(Arc::new(FailingStore { name: POSTGRES }))
        .with(slow);
    let executor = executor(registry, &config);

    let plan = executor
        .dispatcher()
        .plan(&region_air_quality_intent())
        .unwrap();
    let started = Instant::now();
    let err = executor.dispatcher().run(plan).await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    match err {
        QueryError::StoreUnavailable { store, reason } => {
            assert_eq!(store, POSTGRES);
            assert!(reason.contains("connection refused"));
        }
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_text_backed_values_are_normalized() {
    let drill = MemoryStore::new(DRILL).with_rows(
        "sensor_readings.csv",
        rows(vec![
            json!({"timestamp": "2024-03-01T10:00:00Z", "region_id": "1", "co2_level": "412.5", "pm2_5": "12", "pm10": "20", "no2": "8", "so2": "2", "o3": "30"}),
            json!({"timestamp": "2024-03-01T11:00:00Z", "region_id": "1", "co2_level": "417.5", "pm2_5": "14", "pm10": "22", "no2": "9", "so2": "2", "o3": "31"}),
        ]),
    );
    let executor = executor(AdapterRegistry::new().with(Arc::new(drill)), &Config::default());

    let outcome = executor
        .execute("average co2 in sensor readings", Role::Researcher)
        .await
        .unwrap();

    assert_eq!(outcome.stats.stores, vec![DRILL]);
    assert_eq!(
        outcome.result.get(0, "average_co2_level").and_then(|v| v.as_f64()),
        Some(415.0)
    );
    assert!(!outcome.result.partial());
}
