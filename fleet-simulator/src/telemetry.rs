//! Device archetypes and synthetic telemetry generation
//!
//! Each device type owns its own sample shape; generation is pure dispatch
//! over the closed `DeviceType` set. Adding an archetype means adding one
//! enum variant, one sample variant and one generate arm here - nothing else
//! in the simulator changes.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of simulated device archetypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Thermostat,
    Light,
    SecurityCamera,
}

impl DeviceType {
    /// All archetypes, for fleet defaults and tests.
    pub const ALL: [DeviceType; 3] = [
        DeviceType::Thermostat,
        DeviceType::Light,
        DeviceType::SecurityCamera,
    ];

    /// Produce one fresh telemetry sample for this archetype.
    ///
    /// Pure value synthesis: no I/O, no failure modes.
    pub fn generate(self) -> TelemetrySample {
        let mut rng = rand::thread_rng();
        match self {
            DeviceType::Thermostat => TelemetrySample::Thermostat {
                temperature: round1(rng.gen_range(18.0..=26.0)),
                humidity: round1(rng.gen_range(30.0..=60.0)),
                set_point: round1(rng.gen_range(20.0..=24.0)),
            },
            DeviceType::Light => TelemetrySample::Light {
                status: if rng.gen_bool(0.5) {
                    SwitchStatus::On
                } else {
                    SwitchStatus::Off
                },
                brightness: rng.gen_range(0..=100),
            },
            DeviceType::SecurityCamera => TelemetrySample::SecurityCamera {
                status: if rng.gen_bool(0.5) {
                    CameraStatus::Active
                } else {
                    CameraStatus::Standby
                },
                motion_detected: rng.gen_bool(0.2),
            },
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Thermostat => "thermostat",
            DeviceType::Light => "light",
            DeviceType::SecurityCamera => "security_camera",
        };
        f.write_str(name)
    }
}

/// One telemetry reading, shaped by the device archetype.
///
/// Serialized untagged: the wire `data` object carries only the per-type
/// fields.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TelemetrySample {
    Thermostat {
        temperature: f64,
        humidity: f64,
        set_point: f64,
    },
    Light {
        status: SwitchStatus,
        brightness: u8,
    },
    SecurityCamera {
        status: CameraStatus,
        motion_detected: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchStatus {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CameraStatus {
    Active,
    Standby,
}

/// Wire message wrapping one reading with identity and timestamp metadata.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEnvelope {
    pub device_id: String,
    pub device_type: DeviceType,
    pub timestamp: i64,
    pub data: TelemetrySample,
}

impl TelemetryEnvelope {
    /// Wrap a sample with the current unix timestamp, floored to `floor` so
    /// that successive envelopes from one device never go backwards even if
    /// the wall clock does.
    pub fn new(device_id: &str, device_type: DeviceType, data: TelemetrySample, floor: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type,
            timestamp: Utc::now().timestamp().max(floor),
            data,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermostat_samples_stay_in_contract_ranges() {
        for _ in 0..200 {
            match DeviceType::Thermostat.generate() {
                TelemetrySample::Thermostat {
                    temperature,
                    humidity,
                    set_point,
                } => {
                    assert!((18.0..=26.0).contains(&temperature), "temperature {temperature}");
                    assert!((30.0..=60.0).contains(&humidity), "humidity {humidity}");
                    assert!((20.0..=24.0).contains(&set_point), "set_point {set_point}");
                    for value in [temperature, humidity, set_point] {
                        let scaled = value * 10.0;
                        assert!(
                            (scaled - scaled.round()).abs() < 1e-6,
                            "{value} not rounded to one decimal"
                        );
                    }
                }
                other => panic!("thermostat produced {other:?}"),
            }
        }
    }

    #[test]
    fn light_samples_stay_in_contract_ranges() {
        for _ in 0..200 {
            match DeviceType::Light.generate() {
                TelemetrySample::Light { status, brightness } => {
                    assert!(brightness <= 100);
                    assert!(matches!(status, SwitchStatus::On | SwitchStatus::Off));
                }
                other => panic!("light produced {other:?}"),
            }
        }
    }

    #[test]
    fn camera_sample_serializes_contract_fields() {
        let sample = TelemetrySample::SecurityCamera {
            status: CameraStatus::Standby,
            motion_detected: true,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["status"], "STANDBY");
        assert_eq!(json["motion_detected"], true);
    }

    #[test]
    fn light_status_serializes_uppercase() {
        let sample = TelemetrySample::Light {
            status: SwitchStatus::On,
            brightness: 42,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["status"], "ON");
        assert_eq!(json["brightness"], 42);
    }

    #[test]
    fn device_type_names_are_lowercase_tokens() {
        assert_eq!(DeviceType::Thermostat.to_string(), "thermostat");
        assert_eq!(DeviceType::Light.to_string(), "light");
        assert_eq!(DeviceType::SecurityCamera.to_string(), "security_camera");
        let json = serde_json::to_value(DeviceType::SecurityCamera).unwrap();
        assert_eq!(json, "security_camera");
    }

    #[test]
    fn envelope_carries_exact_wire_keys() {
        let envelope = TelemetryEnvelope::new(
            "thermostat1",
            DeviceType::Thermostat,
            DeviceType::Thermostat.generate(),
            0,
        );
        let json = serde_json::to_value(&envelope).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["data", "device_id", "device_type", "timestamp"]);
        assert_eq!(json["device_id"], "thermostat1");
        assert_eq!(json["device_type"], "thermostat");
    }

    #[test]
    fn envelope_timestamp_never_goes_below_floor() {
        let future = Utc::now().timestamp() + 3600;
        let envelope = TelemetryEnvelope::new(
            "light1",
            DeviceType::Light,
            DeviceType::Light.generate(),
            future,
        );
        assert_eq!(envelope.timestamp, future);

        let before = Utc::now().timestamp();
        let envelope = TelemetryEnvelope::new(
            "light1",
            DeviceType::Light,
            DeviceType::Light.generate(),
            0,
        );
        assert!(envelope.timestamp >= before);
    }
}
