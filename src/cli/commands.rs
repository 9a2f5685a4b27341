//! CLI command handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ecofed::{
    create_rest_router, ApiState, Authenticator, Config, QueryExecutor, QueryLog, Role,
    StatusMonitor,
};

use super::output;

fn parse_role(role: Option<&str>, config: &Config) -> Result<Role> {
    match role {
        Some(name) => Role::from_str(name).ok_or_else(|| {
            anyhow!(
                "Unknown role '{}' (expected researcher, data_provider or administrator)",
                name
            )
        }),
        None => Ok(config.auth.default_role),
    }
}

fn monitor(config: &Config, executor: &QueryExecutor) -> StatusMonitor {
    StatusMonitor::new(
        Arc::new(executor.registry().clone()),
        Duration::from_millis(config.monitor.deadline_ms),
    )
}

/// Run the query command.
pub async fn run_query(config: Config, text: String, role: Option<String>, json: bool) -> Result<()> {
    let role = parse_role(role.as_deref(), &config)?;
    let executor = QueryExecutor::from_config(&config)?;

    match executor.execute(&text, role).await {
        Ok(outcome) => {
            output::print_outcome(&outcome, json);
            Ok(())
        }
        Err(e) => {
            output::print_query_error(&e, json);
            std::process::exit(1)
        }
    }
}

/// Run the interpret command. No store is contacted.
pub async fn run_interpret(
    config: Config,
    text: String,
    role: Option<String>,
    json: bool,
) -> Result<()> {
    let role = parse_role(role.as_deref(), &config)?;
    let executor = QueryExecutor::from_config(&config)?;

    let intent = executor.interpret(&text, role)?;
    let plan = executor.dispatcher().plan(&intent)?;
    output::print_intent(&intent, &plan.description, json);
    Ok(())
}

/// Run the status command.
pub async fn run_status(config: Config, json: bool) -> Result<()> {
    let executor = QueryExecutor::from_config(&config)?;
    let status = monitor(&config, &executor).check_all().await;
    output::print_status(&status, json);
    Ok(())
}

/// Run the catalog command.
pub async fn run_catalog(config: Config, json: bool) -> Result<()> {
    let catalog = config.load_catalog()?;
    output::print_catalog(&catalog, json);
    Ok(())
}

/// Start the HTTP server and serve until interrupted.
pub async fn run_serve(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let executor = Arc::new(QueryExecutor::from_config(&config)?);
    let state = Arc::new(
        ApiState::new(
            executor.clone(),
            monitor(&config, &executor),
            config.auth.default_role,
        )
        .with_query_log(QueryLog::new(config.audit.max_entries)),
    );
    let router = create_rest_router(
        state,
        Authenticator::new(config.auth.clone()),
        config.server.enable_cors,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.server.host))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        "Serving {} entities from {} stores on http://{}",
        executor.catalog().len(),
        executor.registry().len(),
        addr
    );
    if !config.auth.enabled {
        tracing::warn!(
            "Authentication disabled; every request runs as {}",
            config.auth.default_role
        );
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
