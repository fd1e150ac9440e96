//! # Ticketing API Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. Load configuration (`GATEWAY_CONFIG_PATH`, default `config/gateway.yaml`)
//!    and apply environment overrides
//! 2. Install the tracer and the logging subscriber
//! 3. Install the Prometheus recorder
//! 4. Build stores from configuration and serve until SIGINT/SIGTERM
//!
//! The same binary runs the standalone events service when pointed at
//! `config/events-service.yaml`.

use anyhow::Context;
use tracing::{error, info};

use ticketing_gateway::core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use ticketing_gateway::gateway::server::shutdown_signal;
use ticketing_gateway::observability::{logging, metrics, tracing as otel};
use ticketing_gateway::{Components, GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = GatewayConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let tracer = otel::init_tracer(&config.observability.tracing)
        .context("failed to initialize tracing exporter")?;
    logging::init_logging(&config.observability.logging, tracer)
        .context("failed to initialize logging")?;

    info!("🚀 Starting ticketing API gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {}", config_path);
    info!("🏷️  Instance: {}", config.server.instance_id);

    let mut components = Components::from_config(&config)?;
    if config.observability.metrics.enabled {
        let handle = metrics::install_prometheus()?;
        info!(
            "📈 Prometheus metrics available at {}",
            config.observability.metrics.endpoint_path
        );
        components = components.with_metrics(handle);
    }
    if config.observability.tracing.enabled {
        info!(
            "📊 Distributed tracing enabled for service '{}'",
            config.observability.tracing.service_name
        );
    }

    let server = GatewayServer::new(config, components)?;
    let result = server.start(shutdown_signal()).await;

    info!("📤 Flushing trace data...");
    otel::shutdown_tracer();

    match result {
        Ok(()) => {
            info!("✅ Gateway shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("🚨 Gateway stopped with an error: {}", e);
            Err(e.into())
        }
    }
}
