//! Configuration loading
//!
//! Connection material comes from the environment (loaded from `.env` by the
//! entry point); the fleet definition comes from a YAML file pointed at by
//! `FLEET_CONFIG`, falling back to a built-in three-device fleet when the
//! file is absent. Missing or invalid connection material is fatal at
//! startup.

use crate::device::{Device, DeviceIdentity, IntervalRange};
use crate::errors::ConfigError;
use crate::telemetry::DeviceType;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

/// rumqttc rejects keep-alive intervals below this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Everything the simulator needs for one run.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub mqtt: MqttSettings,
    pub material: TlsMaterial,
    pub fleet: FleetConfig,
}

impl SimulatorConfig {
    pub async fn load() -> Result<Self, ConfigError> {
        let mqtt = MqttSettings::from_env()?;
        let material = TlsMaterial::load_from_env().await?;
        let fleet = FleetConfig::load().await?;
        Ok(Self {
            mqtt,
            material,
            fleet,
        })
    }
}

/// Broker session settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub endpoint: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = require_var("MQTT_ENDPOINT")?;
        let port = parse_var("MQTT_PORT", 8883)?;
        let client_id = optional_var("MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("fleet-sim-{}", Uuid::new_v4()));
        let keep_alive_secs: u64 = parse_var("MQTT_KEEP_ALIVE_SECS", 30)?;
        if keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidVar {
                var: "MQTT_KEEP_ALIVE_SECS",
                reason: format!("must be at least {MIN_KEEP_ALIVE_SECS} seconds"),
            });
        }
        let clean_session = parse_var("MQTT_CLEAN_SESSION", true)?;
        let connect_timeout_secs: u64 = parse_var("MQTT_CONNECT_TIMEOUT_SECS", 10)?;

        Ok(Self {
            endpoint,
            port,
            client_id,
            keep_alive: Duration::from_secs(keep_alive_secs),
            clean_session,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }
}

/// PEM bytes for the mutual-TLS handshake.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl TlsMaterial {
    pub async fn load_from_env() -> Result<Self, ConfigError> {
        let ca = read_material(require_var("MQTT_CA_PATH")?).await?;
        let client_cert = read_material(require_var("MQTT_CERT_PATH")?).await?;
        let private_key = read_material(require_var("MQTT_PRIVATE_KEY_PATH")?).await?;
        Ok(Self {
            ca,
            client_cert,
            private_key,
        })
    }
}

async fn read_material(path: String) -> Result<Vec<u8>, ConfigError> {
    let path = PathBuf::from(path);
    fs::read(&path)
        .await
        .map_err(|source| ConfigError::Material { path, source })
}

/// Fleet definition: which devices to simulate and how often they publish.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_interval_min")]
    pub interval_min_secs: u64,
    #[serde(default = "default_interval_max")]
    pub interval_max_secs: u64,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

fn default_interval_min() -> u64 {
    5
}

fn default_interval_max() -> u64 {
    15
}

impl FleetConfig {
    /// Load from `$FLEET_CONFIG` (default `fleet.yaml`). A missing file
    /// falls back to the built-in default fleet; an unreadable or invalid
    /// one is fatal.
    pub async fn load() -> Result<Self, ConfigError> {
        let path =
            PathBuf::from(std::env::var("FLEET_CONFIG").unwrap_or_else(|_| "fleet.yaml".into()));
        if !Path::new(&path).exists() {
            warn!(
                "No fleet config at {:?}, simulating the default fleet",
                path
            );
            return Ok(Self::default_fleet());
        }
        let text = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Material {
                path: path.clone(),
                source,
            })?;
        Self::from_yaml(&text, &path)
    }

    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: FleetConfig =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Fleet {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// One device of each archetype, matching the archetype set.
    pub fn default_fleet() -> Self {
        Self {
            interval_min_secs: default_interval_min(),
            interval_max_secs: default_interval_max(),
            devices: vec![
                DeviceEntry {
                    id: "thermostat1".into(),
                    device_type: DeviceType::Thermostat,
                },
                DeviceEntry {
                    id: "light1".into(),
                    device_type: DeviceType::Light,
                },
                DeviceEntry {
                    id: "camera1".into(),
                    device_type: DeviceType::SecurityCamera,
                },
            ],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::EmptyFleet);
        }
        if self.interval_min_secs < 1 || self.interval_min_secs > self.interval_max_secs {
            return Err(ConfigError::Interval {
                min_secs: self.interval_min_secs,
                max_secs: self.interval_max_secs,
            });
        }
        let mut seen = HashSet::new();
        for entry in &self.devices {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::InvalidVar {
                    var: "FLEET_CONFIG",
                    reason: "device entry with empty id".into(),
                });
            }
            if !seen.insert(entry.id.to_lowercase()) {
                return Err(ConfigError::DuplicateDeviceId(entry.id.clone()));
            }
        }
        Ok(())
    }

    /// Materialize the fleet. Ids are lower-cased here to satisfy the topic
    /// format contract.
    pub fn build_devices(&self) -> Vec<Device> {
        let interval = IntervalRange::from_secs(self.interval_min_secs, self.interval_max_secs);
        self.devices
            .iter()
            .map(|entry| {
                Device::new(
                    DeviceIdentity::new(entry.id.to_lowercase(), entry.device_type),
                    interval,
                )
            })
            .collect()
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name).ok_or(ConfigError::MissingVar(name))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            var: name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;

    // Env-var manipulating tests share the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_mqtt_vars() {
        for var in [
            "MQTT_ENDPOINT",
            "MQTT_PORT",
            "MQTT_CLIENT_ID",
            "MQTT_KEEP_ALIVE_SECS",
            "MQTT_CLEAN_SESSION",
            "MQTT_CONNECT_TIMEOUT_SECS",
            "MQTT_CA_PATH",
            "MQTT_CERT_PATH",
            "MQTT_PRIVATE_KEY_PATH",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_endpoint_is_fatal() {
        let _guard = ENV_LOCK.lock();
        clear_mqtt_vars();
        match MqttSettings::from_env() {
            Err(ConfigError::MissingVar("MQTT_ENDPOINT")) => {}
            other => panic!("expected MissingVar, got {other:?}"),
        }
    }

    #[test]
    fn settings_apply_defaults() {
        let _guard = ENV_LOCK.lock();
        clear_mqtt_vars();
        std::env::set_var("MQTT_ENDPOINT", "broker.example.com");
        let settings = MqttSettings::from_env().unwrap();
        assert_eq!(settings.port, 8883);
        assert_eq!(settings.keep_alive, Duration::from_secs(30));
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert!(settings.clean_session);
        assert!(settings.client_id.starts_with("fleet-sim-"));
        clear_mqtt_vars();
    }

    #[test]
    fn keep_alive_floor_is_enforced() {
        let _guard = ENV_LOCK.lock();
        clear_mqtt_vars();
        std::env::set_var("MQTT_ENDPOINT", "broker.example.com");
        std::env::set_var("MQTT_KEEP_ALIVE_SECS", "2");
        assert!(matches!(
            MqttSettings::from_env(),
            Err(ConfigError::InvalidVar {
                var: "MQTT_KEEP_ALIVE_SECS",
                ..
            })
        ));
        clear_mqtt_vars();
    }

    #[tokio::test]
    async fn tls_material_reads_pem_files() {
        let _guard = ENV_LOCK.lock();
        clear_mqtt_vars();
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        ca.write_all(b"-----BEGIN CERTIFICATE-----").unwrap();
        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();

        std::env::set_var("MQTT_CA_PATH", ca.path());
        std::env::set_var("MQTT_CERT_PATH", cert.path());
        std::env::set_var("MQTT_PRIVATE_KEY_PATH", key.path());

        let material = TlsMaterial::load_from_env().await.unwrap();
        assert!(material.ca.starts_with(b"-----BEGIN CERTIFICATE-----"));
        clear_mqtt_vars();
    }

    #[test]
    fn fleet_yaml_parses_with_interval_defaults() {
        let yaml = r#"
devices:
  - id: thermostat1
    type: thermostat
  - id: camera1
    type: security_camera
"#;
        let fleet = FleetConfig::from_yaml(yaml, Path::new("fleet.yaml")).unwrap();
        assert_eq!(fleet.interval_min_secs, 5);
        assert_eq!(fleet.interval_max_secs, 15);
        assert_eq!(fleet.devices.len(), 2);
        assert_eq!(fleet.devices[1].device_type, DeviceType::SecurityCamera);
    }

    #[test]
    fn duplicate_device_ids_are_rejected() {
        let yaml = r#"
devices:
  - id: light1
    type: light
  - id: LIGHT1
    type: light
"#;
        assert!(matches!(
            FleetConfig::from_yaml(yaml, Path::new("fleet.yaml")),
            Err(ConfigError::DuplicateDeviceId(_))
        ));
    }

    #[test]
    fn inverted_interval_range_is_rejected() {
        let yaml = r#"
interval_min_secs: 20
interval_max_secs: 10
devices:
  - id: light1
    type: light
"#;
        assert!(matches!(
            FleetConfig::from_yaml(yaml, Path::new("fleet.yaml")),
            Err(ConfigError::Interval {
                min_secs: 20,
                max_secs: 10
            })
        ));
    }

    #[test]
    fn empty_fleet_is_rejected() {
        let yaml = "devices: []\n";
        assert!(matches!(
            FleetConfig::from_yaml(yaml, Path::new("fleet.yaml")),
            Err(ConfigError::EmptyFleet)
        ));
    }

    #[test]
    fn default_fleet_covers_every_archetype() {
        let fleet = FleetConfig::default_fleet();
        let devices = fleet.build_devices();
        assert_eq!(devices.len(), DeviceType::ALL.len());
        let ids: Vec<&str> = devices
            .iter()
            .map(|d| d.identity().device_id.as_str())
            .collect();
        assert_eq!(ids, ["thermostat1", "light1", "camera1"]);
    }

    #[test]
    fn build_devices_lowercases_ids_for_topics() {
        let yaml = r#"
devices:
  - id: Thermostat1
    type: thermostat
"#;
        let fleet = FleetConfig::from_yaml(yaml, Path::new("fleet.yaml")).unwrap();
        let devices = fleet.build_devices();
        assert_eq!(
            devices[0].identity().topic(),
            "devices/thermostat/thermostat1/telemetry"
        );
    }
}
