//! RDP Pricing Stream Binary
//!
//! Starts the market price streaming client.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin rdp-pricing-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RDP_USERNAME`: Machine id (platform mode) or DACS user name (direct mode)
//! - `RDP_PASSWORD`: Password (platform mode)
//! - `RDP_CLIENT_ID`: App key (platform mode)
//!
//! ## Optional
//! - `RDP_CLIENT_SECRET`, `RDP_SCOPE` (default: trapi)
//! - `RDP_AUTH_HOSTNAME` (default: api.refinitiv.com), `RDP_AUTH_PORT` (default: 443)
//! - `RDP_APP_ID` (default: 256), `RDP_POSITION` (default: local IP)
//! - `RDP_ITEMS`: Comma-separated items (default: /EUR=), `RDP_SERVICE`
//! - `RDP_HOTSTANDBY`: Two sessions in different locations (default: false)
//! - `RDP_ADS_HOST`, `RDP_ADS_PORT` (default: 15000): Connect directly to an ADS
//! - `RDP_WEBSOCKET_SCHEME` (default: wss)
//! - `RDP_RECONNECT_DELAY_SECS` (default: 3), `RDP_TOKEN_RENEWAL_MARGIN_SECS` (default: 30)
//! - `RDP_SHUTDOWN_GRACE_MS` (default: 1000), `RDP_HTTP_TIMEOUT_SECS` (default: 30)
//! - `RDP_AUTH_RETRY_DELAY_SECS`: Retry delay before the first token (default: 3)
//! - `RDP_EVENT_BUS_CAPACITY` (default: 1024)
//! - `RDP_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED` (default: false), `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rdp_pricing_stream::application::services::consumer;
use rdp_pricing_stream::infrastructure::health;
use rdp_pricing_stream::infrastructure::telemetry;
use rdp_pricing_stream::{
    Authenticator, AuthenticatorConfig, ClientConfig, EventBus, HealthServer, HealthServerState,
    RdpRestClient, SessionSupervisor, SupervisorConfig, TokenState, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed past the shutdown grace for the supervisor task to return.
const SUPERVISOR_JOIN_SLACK: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting RDP pricing stream client");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let bus = EventBus::new(config.server.event_bus_capacity);

    // Health view and server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.stream.mode,
    ));
    tokio::spawn(health::track(
        Arc::clone(&health_state),
        bus.subscribe(),
        shutdown_token.clone(),
    ));
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_server = HealthServer::new(
            config.server.health_port,
            Arc::clone(&health_state),
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Message consumer
    tokio::spawn(consumer::run(bus.subscribe(), shutdown_token.clone()));

    // Sessions
    let rest = Arc::new(
        RdpRestClient::new(config.discovery_url(), config.auth.http_timeout)
            .context("failed to build HTTP client")?,
    );

    let mut supervisor_config = SupervisorConfig::new(config.stream.mode, &config.stream.position);
    supervisor_config.session = config.session_config();
    supervisor_config.shutdown_grace = config.server.shutdown_grace;
    supervisor_config.subscriptions = vec![config.subscription()];
    supervisor_config.application_id.clone_from(&config.stream.application_id);

    let mut supervisor = SessionSupervisor::new(Arc::clone(&rest), supervisor_config, bus.clone());
    let supervisor_events = bus.subscribe();

    if let Some(endpoint) = config.direct.clone() {
        supervisor.start_direct(endpoint, config.credentials.username());
    } else {
        let mut auth_config = AuthenticatorConfig::new(config.token_url());
        auth_config.renewal_margin = config.auth.renewal_margin;
        auth_config.retry_delay = config.auth.retry_delay;

        let authenticator = Authenticator::new(
            rest,
            config.credentials.clone(),
            auth_config,
            TokenState::new(&config.stream.position, &config.stream.application_id),
            bus.clone(),
        );
        tokio::spawn(authenticator.run(shutdown_token.clone()));
    }

    let supervisor_task = tokio::spawn(supervisor.run(supervisor_events, shutdown_token.clone()));

    tracing::info!("Streaming client ready");

    await_shutdown(shutdown_token).await;

    // The supervisor disconnects every session on cancellation.
    let join_timeout = config.server.shutdown_grace + SUPERVISOR_JOIN_SLACK;
    if tokio::time::timeout(join_timeout, supervisor_task).await.is_err() {
        tracing::warn!("Sessions still open after grace period, exiting");
    }

    tracing::info!("Streaming client stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        mode = %config.stream.mode,
        direct = config.is_direct(),
        items = ?config.stream.items,
        service = ?config.stream.service,
        application_id = %config.stream.application_id,
        position = %config.stream.position,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    match &config.direct {
        Some(endpoint) => tracing::debug!(%endpoint, "ADS endpoint"),
        None => tracing::debug!(
            token_url = %config.token_url(),
            discovery_url = %config.discovery_url(),
            "Gateway endpoints"
        ),
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
