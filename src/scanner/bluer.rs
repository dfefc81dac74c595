//! BlueZ D-Bus backend for Tilt scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ reports a device once and afterwards only as property changes.
//! Discovery runs with duplicate data enabled, so BlueZ signals the
//! manufacturer data on every advertisement even when the bytes repeat; a
//! Tilt reading a steady gravity is still heard every few seconds.

use super::{FRAME_CHANNEL_BUFFER_SIZE, Frame, ScanError};
use crate::decoder::TILT_COMPANY_ID;
use bluer::{
    Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// LE discovery that reports every advertisement, repeats included.
fn discovery_filter() -> DiscoveryFilter {
    DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    }
}

/// Start scanning for iBeacon advertisements using the BlueZ D-Bus backend.
///
/// This function powers the default adapter and starts LE discovery.
/// Frames are sent through the returned channel until the receiver is
/// dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<Frame>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter.set_discovery_filter(discovery_filter()).await?;

    let mut discovery = Box::pin(adapter.discover_devices().await?);
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state; discovery stops when the
    // stream is dropped.
    tokio::spawn(async move {
        let _session = session;
        let mut watched: HashSet<Address> = HashSet::new();

        while let Some(event) = discovery.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            if tx.is_closed() {
                break;
            }
            if let Err(e) = forward_current(&adapter, address, &tx).await {
                debug!(%address, error = %e, "failed to read manufacturer data");
            }
            if watched.insert(address)
                && let Err(e) = watch_device(&adapter, address, tx.clone()).await
            {
                debug!(%address, error = %e, "failed to watch device");
                watched.remove(&address);
            }
        }
    });

    Ok(rx)
}

/// Rebuild the wire frame from BlueZ's manufacturer-data map, which is keyed
/// by company id and strips it from the payload.
fn frame_from(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<Frame> {
    let data = manufacturer_data.get(&TILT_COMPANY_ID)?;
    let mut frame = Vec::with_capacity(2 + data.len());
    frame.extend_from_slice(&TILT_COMPANY_ID.to_le_bytes());
    frame.extend_from_slice(data);
    Some(frame)
}

/// The frame carried by a device event, if it is a sighting of iBeacon data.
///
/// Every event is a sighting of its own: identical payloads are forwarded
/// each time, so `last_heard` keeps moving while a reading holds steady.
fn sighting(event: &DeviceEvent) -> Option<Frame> {
    match event {
        DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(data)) => frame_from(data),
        _ => None,
    }
}

/// Forward the manufacturer data BlueZ currently holds for a device.
async fn forward_current(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<Frame>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    if let Some(frame) = device.manufacturer_data().await?.as_ref().and_then(frame_from) {
        let _ = tx.send(frame).await;
    }
    Ok(())
}

/// Forward every later manufacturer-data sighting of a device.
async fn watch_device(
    adapter: &Adapter,
    address: Address,
    tx: mpsc::Sender<Frame>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;
    let mut events = Box::pin(device.events().await?);

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Some(frame) = sighting(&event)
                && tx.send(frame).await.is_err()
            {
                break;
            }
        }
    });

    Ok(())
}
