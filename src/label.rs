//! Human-readable labels for Tilt devices.
//!
//! A Tilt is identified by its color, which says little about what it is
//! floating in. Labels let the status page show "red (Stout)" instead.

use crate::registry::ColorLabel;
use std::collections::BTreeMap;

/// Color label to human-readable name.
pub type LabelMap = BTreeMap<ColorLabel, String>;

/// A parsed `COLOR=NAME` mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub color: ColorLabel,
    pub name: String,
}

/// Parse a label from a string in the format "COLOR=NAME".
///
/// # Example
/// ```
/// use tilt_relay::label::parse_label;
///
/// let label = parse_label("red*hd=Stout").unwrap();
/// assert_eq!(label.color.to_string(), "red*hd");
/// assert_eq!(label.name, "Stout");
/// ```
pub fn parse_label(src: &str) -> Result<Label, String> {
    let (color, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid label: expected format COLOR=NAME".to_string())?;
    let color = color.trim().parse().map_err(|e| format!("invalid label: {e}"))?;
    Ok(Label {
        color,
        name: name.to_string(),
    })
}

/// Collect labels into a map; later entries win.
pub fn to_map(labels: &[Label]) -> LabelMap {
    labels.iter().map(|l| (l.color, l.name.clone())).collect()
}

/// Display name for a device: `red (Stout)` when labeled, `red` otherwise.
pub fn display_name(color: &ColorLabel, labels: &LabelMap) -> String {
    match labels.get(color) {
        Some(name) => format!("{color} ({name})"),
        None => color.to_string(),
    }
}
