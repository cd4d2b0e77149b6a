//! dss-backend: gRPC backend for the Discovery and Synchronization Service.
//!
//! Serves the `DiscoveryAndSynchronizationService` RPC API over a
//! Postgres-wire store, with bearer-token authentication.
//!
//! ## Configuration
//! - `-config <file>`: YAML configuration file
//! - `-store-uri <dsn>`: database DSN
//! - `-public-key-file <pem>`: public key for token verification
//! - `-addr <host:port>`: listen address
//! - `DSS_LOG_LEVEL`: log level (default "info")

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use dss::auth::AuthInterceptor;
use dss::proto::discovery_and_synchronization_service_server::DiscoveryAndSynchronizationServiceServer;
use dss::utils::bootstrap;
use dss::{Config, DssService, PgStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let config_path = bootstrap::parse_flag(&args, "config");
    let mut config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(uri) = bootstrap::parse_flag(&args, "store-uri") {
        config.store.uri = uri;
    }
    if let Some(path) = bootstrap::parse_flag(&args, "public-key-file") {
        config.auth.public_key_file = path;
    }
    if let Some(addr) = bootstrap::parse_flag(&args, "addr") {
        config.server.set_addr(&addr);
    }

    info!("Starting dss-backend");

    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(config.store.connect_timeout_secs))
        .connect(&config.store.uri)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to store");
            e
        })?;

    let store = PgStore::new(pool);
    store.bootstrap().await?;
    info!("Store initialized");

    let interceptor = AuthInterceptor::from_public_key_file(&config.auth.public_key_file)
        .map_err(|e| {
            error!(error = %e, "Failed to load public key");
            e
        })?;

    let service = DssService::new(Arc::new(store), config.geo.winding);

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_service_status("", tonic_health::ServingStatus::Serving)
        .await;

    let addr = config.server.addr().parse()?;
    info!(%addr, "DSS backend listening");

    Server::builder()
        .layer(TraceLayer::new_for_grpc())
        .add_service(health_service)
        .add_service(DiscoveryAndSynchronizationServiceServer::with_interceptor(
            service,
            interceptor,
        ))
        .serve(addr)
        .await?;

    Ok(())
}
