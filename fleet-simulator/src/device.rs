//! Simulated devices and their publish loops
//!
//! A `Device` binds one identity to its archetype's generator and owns an
//! independent, randomized publish cadence. Loops are cooperative: they check
//! the cancellation watch at the top of every tick and race it against the
//! inter-tick sleep, so shutdown never waits out a full interval.

use crate::connection::ConnectionManager;
use crate::telemetry::{DeviceType, TelemetryEnvelope};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Immutable identity created at fleet-configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_type: DeviceType,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
        }
    }

    /// Fixed topic format, lower-case tokens (ids are normalized at config
    /// load).
    pub fn topic(&self) -> String {
        format!(
            "devices/{}/{}/telemetry",
            self.device_type, self.device_id
        )
    }
}

/// Bounds for the uniformly drawn pause between publish ticks.
#[derive(Debug, Clone, Copy)]
pub struct IntervalRange {
    min: Duration,
    max: Duration,
}

impl IntervalRange {
    /// Callers validate `min <= max` (config load rejects inverted ranges).
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    /// One uniform draw from [min, max].
    pub fn sample(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let millis = rng.gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(millis as u64)
    }
}

impl Default for IntervalRange {
    fn default() -> Self {
        Self::from_secs(5, 15)
    }
}

/// One simulated device: identity, generator binding, cadence.
#[derive(Debug, Clone)]
pub struct Device {
    identity: DeviceIdentity,
    interval: IntervalRange,
}

impl Device {
    pub fn new(identity: DeviceIdentity, interval: IntervalRange) -> Self {
        Self { identity, interval }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Publish telemetry until the cancellation watch fires.
    ///
    /// Publish failures are logged and the loop continues - this is a
    /// simulator, not a delivery guarantee system.
    pub async fn run_loop(self, connection: Arc<ConnectionManager>, mut cancel: watch::Receiver<bool>) {
        let topic = self.identity.topic();
        let mut last_timestamp = 0i64;

        loop {
            if *cancel.borrow() {
                break;
            }

            let sample = self.identity.device_type.generate();
            let envelope = TelemetryEnvelope::new(
                &self.identity.device_id,
                self.identity.device_type,
                sample,
                last_timestamp,
            );
            last_timestamp = envelope.timestamp;

            match connection.publish(&topic, &envelope).await {
                Ok(()) => debug!(
                    "Published telemetry for '{}' on {}",
                    self.identity.device_id, topic
                ),
                Err(e) => warn!(
                    "Publish failed for '{}' on {}: {}",
                    self.identity.device_id, topic, e
                ),
            }

            let pause = self.interval.sample();
            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Device loop '{}' stopped", self.identity.device_id);
    }
}
