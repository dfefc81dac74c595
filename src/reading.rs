//! Tilt reading data structure.

use crate::registry::Variant;
use std::time::{SystemTime, UNIX_EPOCH};

/// A raw reading from a Tilt hydrometer.
///
/// Values are kept in the fixed-point form broadcast by the device; the
/// scale depends on the variant of the slot that matched the frame:
/// - Gravity is SG x 1000 (standard) or SG x 10000 (Pro)
/// - Temperature is degrees Fahrenheit (standard) or x 10 (Pro)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Raw specific gravity (iBeacon minor)
    pub gravity: u16,
    /// Raw temperature (iBeacon major)
    pub temperature: u16,
    /// Calibrated TX power at 1 m in dBm
    pub tx_power: i8,
    /// Wall-clock time the frame was decoded
    pub observed_at: SystemTime,
}

/// A reading converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledReading {
    /// Specific gravity
    pub gravity: f64,
    /// Temperature in degrees Fahrenheit
    pub temperature: f64,
}

impl Reading {
    pub fn scaled(&self, variant: Variant) -> ScaledReading {
        ScaledReading {
            gravity: f64::from(self.gravity) / variant.gravity_divisor(),
            temperature: f64::from(self.temperature) / variant.temperature_divisor(),
        }
    }

    /// Seconds since the Unix epoch at which the reading was observed.
    pub fn observed_secs(&self) -> i64 {
        unix_seconds(self.observed_at)
    }
}

/// Convert a wall-clock time to whole seconds since the Unix epoch.
///
/// Times before the epoch map to 0, which is also the "never heard" value.
pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
