//! Outbound publication of Tilt readings.
//!
//! The relay hands a [`PublishPayload`] (already scaled to physical units) to
//! a [`Publisher`] and waits for the outcome before making its next decision
//! for that device.

use crate::store::DeviceSnapshot;
use reqwest::{Client, StatusCode};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Body of one publication, e.g.
///
/// ```json
/// {"name":"red","temp":65.0,"temp_unit":"F","gravity":1.015,"gravity_unit":"G"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishPayload {
    /// Color label, `*hd` suffixed for Pro devices
    pub name: String,
    /// Temperature in degrees Fahrenheit, one decimal
    pub temp: Fixed,
    pub temp_unit: &'static str,
    /// Specific gravity, three decimals (standard) or four (Pro)
    pub gravity: Fixed,
    pub gravity_unit: &'static str,
}

/// A number written to JSON with a fixed count of decimals, so `1.000`
/// stays `1.000` on the wire instead of collapsing to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fixed {
    pub value: f64,
    pub decimals: usize,
}

impl Fixed {
    pub fn new(value: f64, decimals: usize) -> Self {
        Self { value, decimals }
    }

    /// The value rounded to its decimals.
    pub fn rounded(self) -> f64 {
        let factor = 10f64.powi(self.decimals as i32);
        (self.value * factor).round() / factor
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.decimals, self.value)
    }
}

impl PartialEq<f64> for Fixed {
    fn eq(&self, other: &f64) -> bool {
        self.rounded() == *other
    }
}

impl Serialize for Fixed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawValue::from_string(self.to_string())
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl PublishPayload {
    /// Build the payload for a device snapshot, or `None` if the device has
    /// never been heard.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Option<Self> {
        let reading = snapshot.state.reading.as_ref()?;
        let variant = snapshot.identity.variant();
        let scaled = reading.scaled(variant);
        Some(Self {
            name: snapshot.identity.label.to_string(),
            temp: Fixed::new(scaled.temperature, 1),
            temp_unit: "F",
            gravity: Fixed::new(scaled.gravity, variant.gravity_decimals()),
            gravity_unit: "G",
        })
    }
}

/// Errors reported by a publish attempt.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Boxed future returned by [`Publisher::publish`].
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>>;

/// Destination for readings. Implementations report success only once the
/// reading has been delivered.
pub trait Publisher: Send + Sync {
    fn publish<'a>(&'a self, payload: &'a PublishPayload) -> PublishFuture<'a>;
}

/// Posts payloads as JSON to a fixed HTTP endpoint.
///
/// Only a `200 OK` response counts as delivered.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    url: String,
}

impl HttpPublisher {
    /// Create a publisher whose requests give up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Publisher for HttpPublisher {
    fn publish<'a>(&'a self, payload: &'a PublishPayload) -> PublishFuture<'a> {
        Box::pin(async move {
            let response = self.client.post(&self.url).json(payload).send().await?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%status, body = %body, "publish response");
            if status == StatusCode::OK {
                Ok(())
            } else {
                Err(PublishError::Status(status))
            }
        })
    }
}

/// Writes each payload as one JSON line, e.g. to stdout for a collector.
#[derive(Debug)]
pub struct LinePublisher<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LinePublisher<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Publisher for LinePublisher<W> {
    fn publish<'a>(&'a self, payload: &'a PublishPayload) -> PublishFuture<'a> {
        let result = (|| -> Result<(), PublishError> {
            let line = serde_json::to_string(payload)?;
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(out, "{line}")?;
            out.flush()?;
            Ok(())
        })();
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::store::{DeviceState, DeviceStore};
    use crate::test_utils::reading;

    fn snapshot(index: usize, gravity: u16, temperature: u16) -> DeviceSnapshot {
        let store = DeviceStore::new(Registry::default());
        let mut snapshot = store.snapshot(index).unwrap();
        snapshot.state = DeviceState {
            reading: Some(reading(gravity, temperature)),
            last_heard: 1_700_000_000,
            pending: true,
            generation: 1,
        };
        snapshot
    }

    #[test]
    fn test_payload_standard() {
        let payload = PublishPayload::from_snapshot(&snapshot(0, 1015, 65)).unwrap();
        assert_eq!(payload.name, "red");
        assert_eq!(payload.gravity, 1.015);
        assert_eq!(payload.temp, 65.0);

        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"name":"red","temp":65.0,"temp_unit":"F","gravity":1.015,"gravity_unit":"G"}"#
        );
    }

    #[test]
    fn test_payload_pro() {
        let payload = PublishPayload::from_snapshot(&snapshot(8, 10152, 651)).unwrap();
        assert_eq!(payload.name, "red*hd");
        assert_eq!(payload.gravity, 1.0152);
        assert_eq!(payload.temp, 65.1);
    }

    #[test]
    fn test_payload_keeps_trailing_zeros() {
        let json = serde_json::to_string(
            &PublishPayload::from_snapshot(&snapshot(0, 1000, 70)).unwrap(),
        )
        .unwrap();
        assert!(json.contains(r#""gravity":1.000,"#));
        assert!(json.contains(r#""temp":70.0,"#));

        let json = serde_json::to_string(
            &PublishPayload::from_snapshot(&snapshot(8, 10500, 700)).unwrap(),
        )
        .unwrap();
        assert!(json.contains(r#""gravity":1.0500,"#));
    }

    #[test]
    fn test_payload_json_parses_as_numbers() {
        let payload = PublishPayload::from_snapshot(&snapshot(13, 10480, 682)).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
        assert_eq!(value["gravity"].as_f64(), Some(1.048));
        assert_eq!(value["temp"].as_f64(), Some(68.2));
        assert_eq!(value["name"], "blue*hd");
    }

    #[test]
    fn test_payload_requires_reading() {
        let store = DeviceStore::new(Registry::default());
        assert!(PublishPayload::from_snapshot(&store.snapshot(0).unwrap()).is_none());
    }

    #[test]
    fn test_line_publisher_writes_json_lines() {
        let publisher = LinePublisher::new(Vec::<u8>::new());
        let first = PublishPayload::from_snapshot(&snapshot(0, 1015, 65)).unwrap();
        let second = PublishPayload::from_snapshot(&snapshot(9, 10480, 682)).unwrap();

        tokio_test::block_on(publisher.publish(&first)).unwrap();
        tokio_test::block_on(publisher.publish(&second)).unwrap();

        let out = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""name":"red""#));
        assert!(lines[1].contains(r#""name":"green*hd""#));
        assert!(lines[1].contains(r#""gravity":1.048"#));
        assert!(lines[1].contains(r#""temp":68.2"#));
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError::Status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "unexpected status 500 Internal Server Error");
    }
}
