//! Ephemeral file and message exchange relay.
//!
//! Entry point: parses CLI/env configuration, builds the shared `RelayState`,
//! spawns the periodic cleanup task, and serves the `axum` router. Shaped
//! after the teacher's `main.rs`: `clap` derive args, `tracing_subscriber`
//! with an `EnvFilter`, a `tokio::spawn` cleanup loop around
//! `tokio::time::interval`, and a router assembled from small route modules.

mod clock;
mod cleanup;
mod config;
mod error;
mod handler;
mod ids;
mod protocol;
mod state;
mod store;
mod upload;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use cleanup::CleanupScheduler;
use config::{Args, RelayConfig};
use protocol::ServerMessage;
use state::RelayState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = Args::parse();
    let config = RelayConfig::from(args);
    let addr = format!("{}:{}", config.host, config.port);

    let state = RelayState::new(config.clone(), Arc::new(SystemClock));

    spawn_cleanup_task(state.clone());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(address = %addr, "starting dropbag relay");
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}

/// Mirrors the teacher's cleanup task: a detached loop ticking on
/// `tokio::time::interval`. Each reclaimed session's member list was
/// snapshotted by the scheduler before the session was deleted, so
/// `session:expired` still reaches every member even though the store no
/// longer has the session to look members up from by the time we send.
fn spawn_cleanup_task(state: RelayState) {
    let interval_ms = state.config.cleanup_interval_ms;
    let scheduler = CleanupScheduler::new(state.config.clone(), state.store.clone(), state.uploads.clone());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let now = state.now();
            let report = scheduler.tick(now);

            for reclaimed in report.expired_sessions.iter().chain(report.evicted_sessions.iter()) {
                let event = ServerMessage::SessionExpired { id: reclaimed.id.clone(), reason: "expired".to_string() };
                for member in &reclaimed.members {
                    state.send_to(*member, event.clone());
                }
            }

            if report.stale_uploads_dropped > 0 {
                tracing::debug!(count = report.stale_uploads_dropped, "dropped stale uploads");
            }
            if !report.expired_sessions.is_empty() || !report.evicted_sessions.is_empty() {
                tracing::info!(
                    expired = report.expired_sessions.len(),
                    evicted = report.evicted_sessions.len(),
                    "cleanup tick reclaimed sessions"
                );
            }
        }
    });
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "sessionCount": state.store.session_count(),
        "fileCount": state.store.file_count(),
        "totalBytes": state.store.total_bytes(),
        "openUploads": state.uploads.open_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_from_empty_args() {
        let args = Args::parse_from(["dropbag"]);
        let config = RelayConfig::from(args);
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_config_overridable_via_cli_flags() {
        let args = Args::parse_from(["dropbag", "--port", "4000", "--max-files-per-session", "10"]);
        let config = RelayConfig::from(args);
        assert_eq!(config.port, 4000);
        assert_eq!(config.max_files_per_session, 10);
    }

    #[tokio::test]
    async fn test_state_creation_starts_empty() {
        let state = RelayState::new(RelayConfig::default(), Arc::new(SystemClock));
        assert_eq!(state.store.session_count(), 0);
        assert_eq!(state.store.total_bytes(), 0);
    }

    #[test]
    fn test_health_json_structure() {
        let value = serde_json::json!({ "status": "ok" });
        assert_eq!(value["status"], "ok");
    }
}
