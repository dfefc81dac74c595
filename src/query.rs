//! Read-only snapshot payloads for the query interface.

use crate::registry::ColorLabel;
use crate::store::{DeviceSnapshot, DeviceStore};
use serde::Serialize;
use std::collections::BTreeMap;

/// Latest reading of one device as served to clients.
///
/// Values are strings so their precision survives any JSON consumer:
/// gravity keeps three (standard) or four (Pro) decimals, temperature is a
/// whole number for standard devices and has one decimal for Pro devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TiltStatus {
    pub color: String,
    pub gravity: String,
    pub temperature: String,
    /// Unix seconds of the last sighting
    pub time: String,
}

impl TiltStatus {
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        let variant = snapshot.identity.variant();
        let (gravity, temperature) = match &snapshot.state.reading {
            Some(reading) => {
                let scaled = reading.scaled(variant);
                (
                    format!("{:.*}", variant.gravity_decimals(), scaled.gravity),
                    format!("{:.*}", variant.temperature_decimals(), scaled.temperature),
                )
            }
            None => (String::new(), String::new()),
        };
        Self {
            color: snapshot.identity.label.to_string(),
            gravity,
            temperature,
            time: snapshot.state.last_heard.to_string(),
        }
    }
}

/// Every device heard after `watermark`, keyed by color label.
pub fn all_since(store: &DeviceStore, watermark: i64) -> BTreeMap<String, TiltStatus> {
    store
        .heard_since(watermark)
        .iter()
        .map(TiltStatus::from_snapshot)
        .map(|status| (status.color.clone(), status))
        .collect()
}

/// The device with `label`, if it was heard after `watermark`.
pub fn one_since(store: &DeviceStore, label: ColorLabel, watermark: i64) -> Option<TiltStatus> {
    store
        .find_heard_since(label, watermark)
        .as_ref()
        .map(TiltStatus::from_snapshot)
}

/// Parse a watermark query parameter; anything unparseable means no filter.
pub fn parse_watermark(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}
