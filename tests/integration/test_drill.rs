//! Drill adapter against a mock REST endpoint.

use std::sync::Arc;

use ecofed::catalog::POSTGRES;
use ecofed::config::StoreConfig;
use ecofed::{
    AdapterRegistry, Config, DrillStore, QueryError, QueryExecutor, Role, SchemaCatalog,
    StoreAdapter,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn drill_store(server: &MockServer) -> DrillStore {
    let config = StoreConfig::drill(POSTGRES, server.uri(), "postgres.public");
    DrillStore::from_config(&config, 2000).unwrap()
}

fn executor(store: DrillStore) -> QueryExecutor {
    QueryExecutor::with_registry(
        Arc::new(SchemaCatalog::builtin()),
        Arc::new(AdapterRegistry::new().with(Arc::new(store))),
        &Config::default(),
    )
}

#[tokio::test]
async fn test_query_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query.json"))
        .and(body_partial_json(json!({"queryType": "SQL"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queryId": "1",
            "columns": ["climate_id", "region_id", "region_name", "temperature"],
            "rows": [
                {"climate_id": "1", "region_id": "1", "region_name": "Amazon Basin", "temperature": "27.0"},
                {"climate_id": "2", "region_id": "1", "region_name": "Amazon Basin", "temperature": "28.0"}
            ],
            "queryState": "COMPLETED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = executor(drill_store(&server))
        .execute("average temperature in Amazon Basin", Role::Researcher)
        .await
        .unwrap();

    assert_eq!(
        outcome.result.get(0, "average_temperature").and_then(|v| v.as_f64()),
        Some(27.5)
    );

    assert_eq!(outcome.generated_sql.len(), 1);
    let sql = &outcome.generated_sql[0];
    assert_eq!(sql.store, POSTGRES);
    assert_eq!(sql.entity, "Climate");
    assert!(sql.query.contains("FROM postgres.public.`climate_with_region`"));
    assert!(sql
        .query
        .ends_with("WHERE LOWER(`region_name`) = 'amazon basin' LIMIT 10000"));
}

#[tokio::test]
async fn test_drill_error_becomes_store_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query.json"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "errorMessage": "VALIDATION ERROR: Table 'climate_with_region' not found"
        })))
        .mount(&server)
        .await;

    let err = executor(drill_store(&server))
        .execute("average temperature in Amazon Basin", Role::Researcher)
        .await
        .unwrap_err();

    match err {
        QueryError::StoreUnavailable { store, reason } => {
            assert_eq!(store, POSTGRES);
            assert!(reason.contains("not found"), "{reason}");
        }
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_query_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "columns": [],
            "rows": [],
            "queryState": "FAILED"
        })))
        .mount(&server)
        .await;

    let err = executor(drill_store(&server))
        .execute("climate", Role::Researcher)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "store_unavailable");
}

#[tokio::test]
async fn test_ping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query.json"))
        .and(body_partial_json(json!({"query": "SHOW TABLES IN `postgres`.`public`"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "columns": ["TABLE_SCHEMA", "TABLE_NAME"],
            "rows": [{"TABLE_SCHEMA": "postgres.public", "TABLE_NAME": "region_info"}],
            "queryState": "COMPLETED"
        })))
        .mount(&server)
        .await;

    assert!(drill_store(&server).ping().await);

    let unreachable = StoreConfig::drill(POSTGRES, "http://127.0.0.1:9", "postgres.public");
    let store = DrillStore::from_config(&unreachable, 500).unwrap();
    assert!(!store.ping().await);
}
