//! HTTP API over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ecofed::catalog::POSTGRES;
use ecofed::config::{ApiKeyEntry, AuthConfig, AuthMethod};
use ecofed::{
    create_rest_router, AdapterRegistry, ApiState, Authenticator, Config, MemoryStore,
    QueryExecutor, RawRow, Role, SchemaCatalog, StatusMonitor,
};
use serde_json::{json, Value};

const PROVIDER_KEY: &str = "provider-key-0001";
const ADMIN_KEY: &str = "admin-key-0001";

fn rows(values: Vec<Value>) -> Vec<RawRow> {
    values
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

async fn spawn_server() -> SocketAddr {
    let postgres = MemoryStore::new(POSTGRES).with_rows(
        "climate_with_region",
        rows(vec![
            json!({"climate_id": 1, "region_id": 1, "region_name": "Amazon Basin", "temperature": 26.0}),
            json!({"climate_id": 2, "region_id": 1, "region_name": "Amazon Basin", "temperature": 28.0}),
            json!({"climate_id": 3, "region_id": 2, "region_name": "Sahara", "temperature": 40.0}),
        ]),
    );
    let registry = Arc::new(AdapterRegistry::new().with(Arc::new(postgres)));
    let executor = Arc::new(QueryExecutor::with_registry(
        Arc::new(SchemaCatalog::builtin()),
        registry.clone(),
        &Config::default(),
    ));
    let monitor = StatusMonitor::new(registry, Duration::from_millis(200));
    let state = Arc::new(ApiState::new(executor, monitor, Role::Researcher));

    let authenticator = Authenticator::new(AuthConfig {
        enabled: true,
        method: AuthMethod::ApiKey,
        api_keys: vec![
            ApiKeyEntry {
                key: PROVIDER_KEY.to_string(),
                user: Some("station-7".to_string()),
                role: Role::DataProvider,
            },
            ApiKeyEntry {
                key: ADMIN_KEY.to_string(),
                user: Some("ana".to_string()),
                role: Role::Administrator,
            },
        ],
        ..AuthConfig::default()
    });
    let router = create_rest_router(state, authenticator, true);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_natural_query() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/natural-query"))
        .header("x-api-key", PROVIDER_KEY)
        .json(&json!({"query": "average temperature in Amazon Basin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["average_temperature"], 27.0);
    assert_eq!(body["columns"], json!(["average_temperature"]));
    assert_eq!(body["partial"], false);
    assert_eq!(body["stats"]["stores"], json!(["postgres"]));
    assert_eq!(body["generated_sql"], json!([]));
    assert!(body["interpretation"]
        .as_str()
        .unwrap()
        .starts_with("Average temperature"));
}

#[tokio::test]
async fn test_error_statuses() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/natural-query");

    let unauthenticated = client
        .post(&url)
        .json(&json!({"query": "average temperature in Amazon Basin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthenticated.status(), 401);

    let ambiguous = client
        .post(&url)
        .header("x-api-key", PROVIDER_KEY)
        .json(&json!({"query": "show me stuff"}))
        .send()
        .await
        .unwrap();
    assert_eq!(ambiguous.status(), 422);
    let body: Value = ambiguous.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "ambiguous_query");
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["data"], json!([]));

    let forbidden = client
        .post(&url)
        .header("x-api-key", PROVIDER_KEY)
        .json(&json!({"query": "average co2 level in sensor readings"}))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);
}

#[tokio::test]
async fn test_status_catalog_and_health() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let status: Value = client
        .get(format!("http://{addr}/api/database-status"))
        .header("x-api-key", PROVIDER_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], json!({"postgres": true}));

    let catalog: Value = client
        .get(format!("http://{addr}/api/catalog"))
        .header("x-api-key", PROVIDER_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(catalog["role"], "data_provider");
    let names: Vec<&str> = catalog["entities"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["name"].as_str())
        .collect();
    assert!(names.contains(&"Climate"));
    assert!(!names.contains(&"SensorReading"));
}

#[tokio::test]
async fn test_query_logs_are_admin_only() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let ask = |key: &'static str, text: &'static str| {
        client
            .post(format!("http://{addr}/api/natural-query"))
            .header("x-api-key", key)
            .json(&json!({ "query": text }))
            .send()
    };

    ask(PROVIDER_KEY, "average temperature in Amazon Basin").await.unwrap();
    ask(PROVIDER_KEY, "average co2 level in sensor readings").await.unwrap();

    let denied = client
        .get(format!("http://{addr}/api/query-logs"))
        .header("x-api-key", PROVIDER_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let body: Value = client
        .get(format!("http://{addr}/api/query-logs?limit=10"))
        .header("x-api-key", ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["user"], "station-7");
    assert_eq!(logs[0]["role"], "data_provider");
    assert_eq!(logs[0]["query"], "average co2 level in sensor readings");
    assert_eq!(logs[0]["success"], false);
    assert_eq!(logs[0]["code"], "forbidden");
    assert_eq!(logs[1]["success"], true);
}
