//! Tilt iBeacon frame decoding.
//!
//! A Tilt advertises an Apple iBeacon whose manufacturer-specific data is
//! laid out as follows (all offsets in bytes):
//!
//! | offset | size | content                                  |
//! |--------|------|------------------------------------------|
//! | 0      | 2    | company id `4C 00` (little-endian 0x004C) |
//! | 2      | 1    | beacon type `0x02`                       |
//! | 3      | 1    | beacon length `0x15`                     |
//! | 4      | 16   | proximity identifier (device color)      |
//! | 20     | 2    | major, big-endian: temperature           |
//! | 22     | 2    | minor, big-endian: specific gravity      |
//! | 24     | 1    | calibrated TX power, signed dBm          |
//!
//! See: https://kvurd.com/blog/tilt-hydrometer-ibeacon-data-format/

use crate::reading::Reading;
use crate::registry::{DeviceIdentity, Registry};
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Length of a Tilt manufacturer-data frame, company id included.
pub const FRAME_LEN: usize = 25;

/// Apple company identifier used by iBeacon frames.
pub const TILT_COMPANY_ID: u16 = 0x004C;

const IDENTIFIER: std::ops::Range<usize> = 4..20;
const MAJOR: std::ops::Range<usize> = 20..22;
const MINOR: std::ops::Range<usize> = 22..24;
const TX_POWER: usize = 24;

/// Reasons a frame is not a reading from a registered Tilt.
///
/// Rejections are expected for most radio traffic and are never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid frame length: expected 25 bytes, got {0}")]
    InvalidLength(usize),
    #[error("unknown company id: 0x{0:04X}")]
    UnknownCompany(u16),
    #[error("unregistered identifier: {0}")]
    UnknownIdentifier(Uuid),
    #[error("implausible gravity {gravity} for every slot registered to {identifier}")]
    ImplausibleGravity { identifier: Uuid, gravity: u16 },
}

/// A reading matched to a registry slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Index of the matched `DeviceIdentity`
    pub index: usize,
    pub reading: Reading,
}

/// Decode a frame, stamping the reading with the current wall-clock time.
pub fn decode(registry: &Registry, payload: &[u8]) -> Result<Decoded, DecodeError> {
    decode_at(registry, payload, SystemTime::now())
}

/// Decode a frame observed at `observed_at`.
///
/// Validation stops at the first failure:
/// 1. the frame must be exactly [`FRAME_LEN`] bytes,
/// 2. it must start with the iBeacon company id,
/// 3. its identifier must belong to at least one registry slot,
/// 4. the minor field must be a plausible gravity for one of those slots.
///
/// Slots sharing an identifier are examined in registry order and the first
/// whose variant accepts the gravity wins.
pub fn decode_at(
    registry: &Registry,
    payload: &[u8],
    observed_at: SystemTime,
) -> Result<Decoded, DecodeError> {
    if payload.len() != FRAME_LEN {
        return Err(DecodeError::InvalidLength(payload.len()));
    }

    let company = u16::from_le_bytes([payload[0], payload[1]]);
    if company != TILT_COMPANY_ID {
        return Err(DecodeError::UnknownCompany(company));
    }

    let mut identifier = [0u8; 16];
    identifier.copy_from_slice(&payload[IDENTIFIER]);
    let identifier = Uuid::from_bytes(identifier);
    let temperature = u16::from_be_bytes([payload[MAJOR.start], payload[MAJOR.start + 1]]);
    let gravity = u16::from_be_bytes([payload[MINOR.start], payload[MINOR.start + 1]]);
    let tx_power = payload[TX_POWER] as i8;

    let mut candidates = registry.candidates(identifier).peekable();
    if candidates.peek().is_none() {
        return Err(DecodeError::UnknownIdentifier(identifier));
    }

    let identity: &DeviceIdentity = candidates
        .find(|d| d.variant().accepts_gravity(gravity))
        .ok_or(DecodeError::ImplausibleGravity {
            identifier,
            gravity,
        })?;

    Ok(Decoded {
        index: identity.index,
        reading: Reading {
            gravity,
            temperature,
            tx_power,
            observed_at,
        },
    })
}
