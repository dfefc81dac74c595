use crate::decoder::{FRAME_LEN, TILT_COMPANY_ID};
use crate::reading::Reading;
use crate::registry::Color;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A stable wall-clock time for unit tests.
pub fn test_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Build a 25-byte iBeacon manufacturer-data frame as broadcast by a Tilt.
pub fn tilt_frame(identifier: Uuid, temperature: u16, gravity: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.extend_from_slice(&TILT_COMPANY_ID.to_le_bytes());
    frame.extend_from_slice(&[0x02, 0x15]);
    frame.extend_from_slice(identifier.as_bytes());
    frame.extend_from_slice(&temperature.to_be_bytes());
    frame.extend_from_slice(&gravity.to_be_bytes());
    frame.push(0xC5); // -59 dBm
    frame
}

/// Frame for a standard or Pro Tilt of the given color.
pub fn color_frame(color: Color, temperature: u16, gravity: u16) -> Vec<u8> {
    tilt_frame(color.identifier(), temperature, gravity)
}

/// Build a `Reading` observed at `test_time()`.
pub fn reading(gravity: u16, temperature: u16) -> Reading {
    Reading {
        gravity,
        temperature,
        tx_power: -59,
        observed_at: test_time(),
    }
}
