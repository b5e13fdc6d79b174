//! Error taxonomy for the simulator
//!
//! Only configuration and connection establishment are allowed to terminate
//! the process; everything else is logged at the loop that observed it.

use crate::connection::ConnectionState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal at startup: missing or invalid connection material / fleet config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("failed to read TLS material at {path}: {source}")]
    Material {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fleet config {path}: {source}")]
    Fleet {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("fleet config declares no devices")]
    EmptyFleet,

    #[error("duplicate device id '{0}' in fleet config")]
    DuplicateDeviceId(String),

    #[error("invalid publish interval range [{min_secs}, {max_secs}]")]
    Interval { min_secs: u64, max_secs: u64 },
}

/// Fatal: the run aborts when the shared broker session cannot be established.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("broker connection not established within {timeout:?}: {detail}")]
    Timeout { timeout: Duration, detail: String },
}

/// Non-fatal: surfaced to the publishing device loop for logging only.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("connection state is {0}, publish rejected")]
    NotConnected(ConnectionState),

    #[error("failed to encode telemetry envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport rejected publish: {0}")]
    Transport(#[from] rumqttc::ClientError),
}

/// Non-fatal to the fleet: one device loop died and will be restarted.
#[derive(Debug, Error)]
#[error("device loop '{device_id}' terminated unexpectedly: {reason}")]
pub struct DeviceLoopError {
    pub device_id: String,
    pub reason: String,
}

/// Top-level failures that are allowed to end the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection failed: {0}")]
    Connect(#[from] ConnectError),
}

impl FatalError {
    /// Process exit code: clean shutdown exits 0 without constructing one of
    /// these.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Connect(_) => 1,
            FatalError::Config(_) => 2,
        }
    }
}
