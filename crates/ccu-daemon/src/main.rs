//! ccu-daemon entry point.
//!
//! Thin on purpose: tracing, config, shared state, middleware, serve. Route
//! handlers live in `routes.rs`; shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use ccu_config::{report_unused_keys, CellConfig, ConfigConsumer, UnusedKeyPolicy};
use ccu_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Engine tick; re-runs dispatch for steps deferred while no adapter was attached.
const ENGINE_TICK: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (cfg, config_hash) = load_config()?;
    let shared = Arc::new(state::AppState::from_config(&cfg, config_hash)?);

    state::spawn_heartbeat(
        shared.bus.clone(),
        Duration::from_millis(cfg.daemon.heartbeat_ms.max(1)),
    );
    state::spawn_engine_tick(Arc::clone(&shared.engine), ENGINE_TICK);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match bind_addr_from_env() {
        Some(a) => a,
        None => cfg
            .daemon
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid daemon.bind_addr '{}'", cfg.daemon.bind_addr))?,
    };
    info!("ccu-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// `CCU_CONFIG` holds comma-separated YAML paths, later files overriding
/// earlier ones. Unset means built-in defaults and no config hash.
fn load_config() -> anyhow::Result<(CellConfig, Option<String>)> {
    let Ok(raw) = std::env::var("CCU_CONFIG") else {
        info!("CCU_CONFIG unset; running with built-in defaults");
        return Ok((CellConfig::default(), None));
    };
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let loaded = ccu_config::load_layered_yaml(&paths)?;

    let report = report_unused_keys(
        ConfigConsumer::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    for pointer in &report.unused_leaf_pointers {
        warn!(key = %pointer, "config key not read by the daemon");
    }

    info!(config_hash = %loaded.config_hash, files = paths.len(), "config loaded");
    Ok((loaded.cell()?, Some(loaded.config_hash)))
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("CCU_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
