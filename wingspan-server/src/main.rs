mod demo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrow_flight::flight_service_server::FlightServiceServer;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use wingspan_core::backend::memory::MemoryBackend;
use wingspan_core::config::ServerConfig;
use wingspan_core::service::{ServiceConfig, SqlFlightService};
use wingspan_core::statements::CacheConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load().context("failed to load configuration")?;
    init_tracing(&config);
    info!("service config:\n{config:?}");
    let addr = config.bind_addr().context("failed to resolve bind address")?;

    let backend = Arc::new(demo::demo_backend(&config).context("failed to seed demo backend")?);
    let flight_service = SqlFlightService::with_config(backend, service_config(&config));

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<FlightServiceServer<SqlFlightService<MemoryBackend>>>()
        .await;

    info!(%addr, "starting Wingspan Flight SQL server");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }

        health_reporter
            .set_not_serving::<FlightServiceServer<SqlFlightService<MemoryBackend>>>()
            .await;

        let _ = shutdown_tx.send(());
    });

    Server::builder()
        .add_service(health_service)
        .add_service(FlightServiceServer::new(flight_service))
        .serve_with_shutdown(addr, async {
            shutdown_rx.await.ok();
        })
        .await
        .context("Flight SQL server terminated unexpectedly")?;

    info!("server shutdown complete");
    Ok(())
}

fn service_config(config: &ServerConfig) -> ServiceConfig {
    let defaults = CacheConfig::default();
    ServiceConfig {
        prepared_statements: CacheConfig {
            capacity: config.prepared_statement_cache_size.unwrap_or(defaults.capacity),
            idle_timeout: config
                .prepared_statement_idle_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        },
        statements: CacheConfig {
            capacity: config.statement_cache_size.unwrap_or(defaults.capacity),
            idle_timeout: config
                .statement_idle_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        },
    }
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wingspan_core::service=debug"));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
            .init();
    }
}
