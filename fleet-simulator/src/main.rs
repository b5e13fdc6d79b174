//! Fleet Simulator - simulated IoT devices for ingestion load-testing
//!
//! Connects to an MQTT broker over mutually authenticated TLS and runs one
//! concurrent publish loop per configured device, each emitting synthetic
//! telemetry at its own randomized cadence until the process is told to stop.

mod config;
mod connection;
mod device;
mod errors;
mod scheduler;
mod telemetry;

use crate::config::SimulatorConfig;
use crate::connection::ConnectionManager;
use crate::errors::FatalError;
use crate::scheduler::PublishScheduler;
use std::time::Duration;
use tracing::{error, info};

/// Grace period granted to each device loop during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_simulator=info,rumqttc=warn".into()),
        )
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), FatalError> {
    let config = SimulatorConfig::load().await?;
    info!(
        "Starting fleet simulator: {} devices, publish interval [{}, {}]s, broker {}:{}",
        config.fleet.devices.len(),
        config.fleet.interval_min_secs,
        config.fleet.interval_max_secs,
        config.mqtt.endpoint,
        config.mqtt.port
    );

    // Fatal on failure: no device can publish without the shared session.
    let connection = ConnectionManager::connect(&config.mqtt, &config.material).await?;

    let devices = config.fleet.build_devices();
    let mut scheduler = PublishScheduler::new(SHUTDOWN_GRACE);
    scheduler.start(devices, connection.clone());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    scheduler.stop().await;
    connection.shutdown().await;
    Ok(())
}
