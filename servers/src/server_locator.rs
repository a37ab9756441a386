//! # Location Server
//!
//! Hosts the device location pipeline in one process:
//!
//! - **MQTT Ingest**: subscribes to the OwnTracks topic and stores every valid
//!   location report in Postgres/PostGIS.
//! - **Enrichment**: a single worker reverse geocodes the newest un-geocoded
//!   sample each time the store rings the doorbell.
//! - **Query API**: recorder-compatible HTTP routes, the public location
//!   summary, place search, the legacy form endpoint and the WebSocket `LAST`
//!   responder.
//! - **Graceful Shutdown**: `tokio-graceful` waits for Ctrl-C/SIGTERM, then the
//!   shutdown coordinator stops ingest, closes the enrichment queue and drains
//!   the HTTP server, bounded by `shutdownGraceSeconds`.
//!
//! Configuration comes from CLI flags and `LOCATOR_*` environment variables
//! (a `.env` file is honoured), over an optional JSON file, over defaults.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tracing::{error, info, warn};

use lib_locator::api::{serve, AppState, LogAlerter};
use lib_locator::connections::Database;
use lib_locator::enrichment::EnrichmentWorker;
use lib_locator::ingestors::{MqttListener, MqttSettings};
use lib_locator::locations::PostgresLocationRepository;
use lib_locator::loggers::init_tracing;
use lib_locator::retrieve::{GeocodingProvider, HttpGeocoder};
use lib_locator::{Doorbell, LocationStore, LocatorConfig, ShutdownCoordinator};

const APP_NAME: &str = "server_locator";
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = LocatorConfig::load().context("Invalid configuration")?;
    let _log_guard = init_tracing(APP_NAME, config.log_dir.as_deref(), &config.log_level)
        .context("Failed to initialise logging")?;
    info!("Starting {} with {}", APP_NAME, config);
    if !config.config_file_loaded {
        info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config.config_path.display()
        );
    }

    let db = Database::new(&config.database_url, config.database_max_connections)?;
    if let Err(e) = db.ping().await {
        warn!(error = %e, "Database not reachable yet, queries will fail until it is.");
    }

    let (doorbell, doorbell_rx) = Doorbell::new(config.enrichment_queue_capacity);
    let store = LocationStore::new(Arc::new(PostgresLocationRepository::new(db)), doorbell.clone());
    let geocoder: Arc<dyn GeocodingProvider> = Arc::new(HttpGeocoder::new(
        config.geocode_api_url.as_str(),
        config.geocode_api_key.clone(),
        config.geocode_max_retries,
    )?);
    let coordinator = Arc::new(ShutdownCoordinator::new(doorbell));

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    let trigger = Arc::clone(&coordinator);
    let shutdown = Shutdown::new(async move {
        tokio_graceful::default_signal().await;
        info!("Termination signal received.");
        trigger.shutdown();
    });

    let mqtt = MqttListener::new(
        MqttSettings {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            client_id: config.mqtt_client_id.clone(),
            credentials: config.mqtt_credentials.clone(),
            topic: config.mqtt_topic.clone(),
            keep_alive: MQTT_KEEP_ALIVE,
            reconnect_delay: config.mqtt_reconnect_delay,
        },
        store.clone(),
    );
    let ingest_token = coordinator.ingest_token();
    shutdown.spawn_task(async move {
        if let Err(e) = mqtt.start(ingest_token).await {
            error!(error = %e, "MQTT ingest could not start.");
        }
    });

    let worker = EnrichmentWorker::new(store.clone(), Arc::clone(&geocoder));
    shutdown.spawn_task(worker.run(doorbell_rx, coordinator.enrichment_token()));

    let state = AppState {
        store,
        geocoder,
        alerter: Arc::new(LogAlerter {
            production: config.production,
        }),
        device_ids: Arc::new(config.device_ids.clone()),
        shutdown: coordinator.server_token(),
    };
    let server_token = coordinator.server_token();
    shutdown.spawn_task(async move {
        if let Err(e) = serve(listener, state, server_token).await {
            error!(error = %e, "HTTP server failed.");
        }
    });

    match shutdown.shutdown_with_limit(config.shutdown_grace).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    Ok(())
}
