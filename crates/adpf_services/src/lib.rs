//! ADPF Services Layer
//!
//! Run configuration: defaults, an optional JSON file, and environment
//! overrides for the knobs that are usually flipped on a device.

pub mod settings;

pub use settings::{CalibrationMode, LoadTest, Settings, SettingsError};
