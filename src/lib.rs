//! `tilt-relay` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Frame decoding, the device store and the debounce
//! scheduler are plain synchronous types; [`crate::relay`] ties them to a
//! [`crate::publisher::Publisher`], and [`crate::app`] drives the relay from a
//! scanner so it can be tested deterministically with injected fakes.

pub mod app;
pub mod decoder;
pub mod duration;
pub mod http;
pub mod label;
pub mod publisher;
pub mod query;
pub mod reading;
pub mod registry;
pub mod relay;
pub mod scanner;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use decoder::{DecodeError, Decoded, decode};
pub use label::{Label, LabelMap, parse_label};
pub use publisher::{HttpPublisher, LinePublisher, PublishError, PublishPayload, Publisher};
pub use reading::Reading;
pub use registry::{Color, ColorLabel, DeviceIdentity, Registry, Variant};
pub use relay::{Relay, TickOutcome};
pub use scanner::{Backend, Frame, ScanError};
pub use scheduler::{Scheduler, Tick, TimerState};
pub use store::{DeviceSnapshot, DeviceState, DeviceStore, SharedStore};
