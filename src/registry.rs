//! Fixed roster of Tilt hydrometers.
//!
//! Every Tilt color broadcasts a well-known iBeacon identifier. The Pro (HD)
//! models reuse the identifiers of the standard models, so the registry holds
//! two slots per identifier and the decoder picks between them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Default debounce interval between two publications of the same device.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Label suffix marking the Pro variant (e.g. `red*hd`).
pub const PRO_SUFFIX: &str = "*hd";

/// Tilt colors, in the order of their beacon identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Color {
    Red,
    Green,
    Black,
    Purple,
    Orange,
    Blue,
    Yellow,
    Pink,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Red,
        Color::Green,
        Color::Black,
        Color::Purple,
        Color::Orange,
        Color::Blue,
        Color::Yellow,
        Color::Pink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Black => "black",
            Color::Purple => "purple",
            Color::Orange => "orange",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
            Color::Pink => "pink",
        }
    }

    /// The iBeacon proximity identifier broadcast by this color.
    ///
    /// Identifiers follow `A495BBx0-C5B1-4B44-B512-1370F02D74DE` with `x`
    /// running from 1 (red) to 8 (pink).
    pub const fn identifier(self) -> Uuid {
        let nibble = self as u128 + 1;
        Uuid::from_u128(0xA495BB00_C5B1_4B44_B512_1370F02D74DE | (nibble << 100))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product family. Both families share the identifier space and differ in
/// the fixed-point scale of their readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variant {
    Standard,
    Pro,
}

/// Highest raw gravity a standard Tilt can plausibly report (SG 2.000).
pub const STANDARD_GRAVITY_CEILING: u16 = 2000;

impl Variant {
    /// Whether a raw minor value is a plausible gravity for this variant.
    ///
    /// Standard gravity is SG x 1000, so anything above 2000 must come from a
    /// Pro (SG x 10000), whose readings in turn never fall to that range.
    pub fn accepts_gravity(self, raw: u16) -> bool {
        match self {
            Variant::Standard => raw <= STANDARD_GRAVITY_CEILING,
            Variant::Pro => raw > STANDARD_GRAVITY_CEILING,
        }
    }

    pub fn gravity_divisor(self) -> f64 {
        match self {
            Variant::Standard => 1000.0,
            Variant::Pro => 10000.0,
        }
    }

    pub fn gravity_decimals(self) -> usize {
        match self {
            Variant::Standard => 3,
            Variant::Pro => 4,
        }
    }

    pub fn temperature_decimals(self) -> usize {
        match self {
            Variant::Standard => 0,
            Variant::Pro => 1,
        }
    }

    pub fn temperature_divisor(self) -> f64 {
        match self {
            Variant::Standard => 1.0,
            Variant::Pro => 10.0,
        }
    }
}

/// Color label as published and queried: `red` or `red*hd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColorLabel {
    pub color: Color,
    pub variant: Variant,
}

impl fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Variant::Standard => write!(f, "{}", self.color),
            Variant::Pro => write!(f, "{}{}", self.color, PRO_SUFFIX),
        }
    }
}

/// Errors returned when parsing a color label.
#[derive(Error, Debug, PartialEq)]
#[error("unknown Tilt color: '{0}'")]
pub struct ParseColorError(pub String);

/// Labels are matched ignoring ASCII case, the `*hd` suffix included.
impl FromStr for ColorLabel {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.len().saturating_sub(PRO_SUFFIX.len());
        let (name, variant) = match (s.get(..split), s.get(split..)) {
            (Some(name), Some(suffix)) if suffix.eq_ignore_ascii_case(PRO_SUFFIX) => {
                (name, Variant::Pro)
            }
            _ => (s, Variant::Standard),
        };
        Color::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
            .map(|color| ColorLabel { color, variant })
            .ok_or_else(|| ParseColorError(s.to_string()))
    }
}

/// Permanent identity of one registry slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    /// Position in the registry, the only stable cross-reference.
    pub index: usize,
    pub identifier: Uuid,
    pub label: ColorLabel,
    pub interval: Duration,
}

impl DeviceIdentity {
    pub fn variant(&self) -> Variant {
        self.label.variant
    }
}

/// Errors returned when building a registry from a custom roster.
#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("duplicate color label: {0}")]
    DuplicateLabel(ColorLabel),
    #[error("identifier {identifier} registered twice for the same variant ({label})")]
    DuplicateIdentifier { identifier: Uuid, label: ColorLabel },
}

/// Immutable table of known devices.
#[derive(Debug, Clone)]
pub struct Registry {
    devices: Vec<DeviceIdentity>,
}

impl Registry {
    /// Build a registry from `(identifier, label, interval)` slots.
    ///
    /// Indices are assigned from slot order. Two slots may share an
    /// identifier only if one is standard and the other is Pro.
    pub fn new(
        slots: impl IntoIterator<Item = (Uuid, ColorLabel, Duration)>,
    ) -> Result<Self, RegistryError> {
        let mut devices: Vec<DeviceIdentity> = Vec::new();
        for (identifier, label, interval) in slots {
            if devices.iter().any(|d| d.label == label) {
                return Err(RegistryError::DuplicateLabel(label));
            }
            if devices
                .iter()
                .any(|d| d.identifier == identifier && d.variant() == label.variant)
            {
                return Err(RegistryError::DuplicateIdentifier { identifier, label });
            }
            devices.push(DeviceIdentity {
                index: devices.len(),
                identifier,
                label,
                interval,
            });
        }
        Ok(Self { devices })
    }

    /// The full Tilt roster: eight standard slots followed by eight Pro slots.
    pub fn tilt(interval: Duration) -> Self {
        let devices = [Variant::Standard, Variant::Pro]
            .into_iter()
            .flat_map(|variant| Color::ALL.into_iter().map(move |color| (color, variant)))
            .enumerate()
            .map(|(index, (color, variant))| DeviceIdentity {
                index,
                identifier: color.identifier(),
                label: ColorLabel { color, variant },
                interval,
            })
            .collect();
        Self { devices }
    }

    pub fn get(&self, index: usize) -> Option<&DeviceIdentity> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices.iter()
    }

    /// Slots broadcasting `identifier`, in registry order.
    pub fn candidates(&self, identifier: Uuid) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices
            .iter()
            .filter(move |d| d.identifier == identifier)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::tilt(DEFAULT_PUBLISH_INTERVAL)
    }
}
