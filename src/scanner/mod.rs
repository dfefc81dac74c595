//! BLE scanner abstraction for Tilt hydrometers.
//!
//! Backends deliver raw iBeacon manufacturer-data frames (company id
//! included) and leave decoding to [`crate::decoder`], so the radio side
//! holds no reference to the device registry.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use thiserror::Error;
use tokio::sync::mpsc;

/// A raw manufacturer-specific data payload, company id first.
pub type Frame = Vec<u8>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
#[cfg(feature = "hci")]
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// Channel buffer size for frames.
pub const FRAME_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

/// Start scanning for iBeacon frames using the specified backend.
///
/// The returned receiver yields every manufacturer-data payload carrying the
/// iBeacon company id; the channel closes when the backend stops.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<Frame>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}
