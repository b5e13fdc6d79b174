//! Telemetry wire-contract checks
//!
//! The simulator publishes JSON envelopes on
//! `devices/{device_type}/{device_id}/telemetry`. These helpers let tests
//! assert the topic format, the envelope keys and the per-archetype sample
//! shapes without duplicating the checks in every test.

use anyhow::{bail, ensure, Context, Result};
use serde_json::Value;

/// Tokens extracted from a telemetry topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParts {
    pub device_type: String,
    pub device_id: String,
}

/// Parse and validate a `devices/{device_type}/{device_id}/telemetry` topic.
pub fn parse_topic(topic: &str) -> Result<TopicParts> {
    let parts: Vec<&str> = topic.split('/').collect();
    ensure!(
        parts.len() == 4 && parts[0] == "devices" && parts[3] == "telemetry",
        "malformed telemetry topic: {topic}"
    );
    for token in [parts[1], parts[2]] {
        ensure!(!token.is_empty(), "empty token in topic: {topic}");
        ensure!(
            token.chars().all(|c| !c.is_ascii_uppercase()),
            "topic token '{token}' is not lower-case in {topic}"
        );
    }
    Ok(TopicParts {
        device_type: parts[1].to_string(),
        device_id: parts[2].to_string(),
    })
}

/// Parsed telemetry envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeView {
    pub device_id: String,
    pub device_type: String,
    pub timestamp: i64,
    pub data: Value,
}

/// Parse a payload and validate the envelope contract: UTF-8 JSON object
/// with exactly the keys `device_id`, `device_type`, `timestamp`, `data`.
pub fn parse_envelope(payload: &[u8]) -> Result<EnvelopeView> {
    let value: Value = serde_json::from_slice(payload).context("payload is not valid JSON")?;
    let object = value
        .as_object()
        .context("envelope is not a JSON object")?;

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    ensure!(
        keys == ["data", "device_id", "device_type", "timestamp"],
        "envelope keys {keys:?} do not match the contract"
    );

    Ok(EnvelopeView {
        device_id: object["device_id"]
            .as_str()
            .context("device_id is not a string")?
            .to_string(),
        device_type: object["device_type"]
            .as_str()
            .context("device_type is not a string")?
            .to_string(),
        timestamp: object["timestamp"]
            .as_i64()
            .context("timestamp is not an integer")?,
        data: object["data"].clone(),
    })
}

/// Validate a sample against its archetype's field and range contract.
pub fn check_sample(device_type: &str, data: &Value) -> Result<()> {
    match device_type {
        "thermostat" => {
            check_range(data, "temperature", 18.0, 26.0)?;
            check_range(data, "humidity", 30.0, 60.0)?;
            check_range(data, "set_point", 20.0, 24.0)?;
        }
        "light" => {
            check_choice(data, "status", &["ON", "OFF"])?;
            let brightness = field(data, "brightness")?
                .as_u64()
                .context("brightness is not an integer")?;
            ensure!(brightness <= 100, "brightness {brightness} out of range");
        }
        "security_camera" => {
            check_choice(data, "status", &["ACTIVE", "STANDBY"])?;
            ensure!(
                field(data, "motion_detected")?.is_boolean(),
                "motion_detected is not a boolean"
            );
        }
        other => bail!("unknown device type '{other}'"),
    }
    Ok(())
}

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a Value> {
    data.get(name)
        .with_context(|| format!("sample is missing field '{name}'"))
}

fn check_range(data: &Value, name: &str, min: f64, max: f64) -> Result<()> {
    let value = field(data, name)?
        .as_f64()
        .with_context(|| format!("'{name}' is not a number"))?;
    ensure!(
        (min..=max).contains(&value),
        "'{name}' = {value} outside [{min}, {max}]"
    );
    Ok(())
}

fn check_choice(data: &Value, name: &str, allowed: &[&str]) -> Result<()> {
    let value = field(data, name)?
        .as_str()
        .with_context(|| format!("'{name}' is not a string"))?;
    ensure!(
        allowed.contains(&value),
        "'{name}' = '{value}' not in {allowed:?}"
    );
    Ok(())
}
