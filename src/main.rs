use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telecare_backend::audit::{self, HttpSink, NullSink};
use telecare_backend::auth::AuthService;
use telecare_backend::config::Config;
use telecare_backend::rooms::RoomRegistry;
use telecare_backend::state::AppState;
use telecare_backend::ws::ws_routes;
use telecare_backend::api;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Telecare signaling backend...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        host = %config.server_host,
        port = %config.server_port,
        "Configuration loaded"
    );

    // Audit trail and clinical data sinks; without a configured URL
    // records only hit the local log.
    let (audit_emitter, _audit_worker) = match &config.audit_sink_url {
        Some(url) => {
            tracing::info!(url = %url, "Audit sink configured");
            audit::spawn_emitter(
                "audit",
                HttpSink::new(url.clone()),
                config.audit_buffer_capacity,
            )
        }
        None => {
            tracing::warn!("No audit sink configured, audit events are log-only");
            audit::spawn_emitter("audit", NullSink, config.audit_buffer_capacity)
        }
    };
    let (clinical_emitter, _clinical_worker) = match &config.clinical_sink_url {
        Some(url) => {
            tracing::info!(url = %url, "Clinical sink configured");
            audit::spawn_emitter(
                "clinical",
                HttpSink::new(url.clone()),
                config.audit_buffer_capacity,
            )
        }
        None => {
            tracing::warn!("No clinical sink configured, vitals records are log-only");
            audit::spawn_emitter("clinical", NullSink, config.audit_buffer_capacity)
        }
    };
    let (transcript_emitter, _transcript_worker) = match &config.transcript_sink_url {
        Some(url) => {
            tracing::info!(url = %url, "Transcript sink configured");
            audit::spawn_emitter(
                "transcript",
                HttpSink::new(url.clone()),
                config.audit_buffer_capacity,
            )
        }
        None => {
            tracing::warn!("No transcript sink configured, chat messages are log-only");
            audit::spawn_emitter("transcript", NullSink, config.audit_buffer_capacity)
        }
    };

    // Room registry and its garbage-collection sweeper
    let registry = Arc::new(RoomRegistry::new(
        audit_emitter,
        clinical_emitter,
        transcript_emitter,
        Duration::from_secs(config.room_ttl_seconds),
    ));
    registry.spawn_sweeper(SWEEP_INTERVAL);

    // Auth service (verifies tokens issued by the identity service)
    let auth = AuthService::new(&config);

    // Create application state
    let state = AppState::new(config.clone(), auth, registry);

    // Build router
    let app = Router::new()
        .merge(api::create_router(state.clone()))
        .merge(ws_routes().with_state(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run server with graceful shutdown; connect info feeds the
    // per-connection metadata.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
