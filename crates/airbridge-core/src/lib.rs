//! # airbridge-core
//!
//! Core types, traits, and error definitions shared across all airbridge crates.
//!
//! This crate provides:
//! - Virtual device representation and transport states
//! - Typed command and state events
//! - The in-process event bus
//! - DSP configuration schema and validation
//! - Bridge configuration and per-device persisted state

pub mod bus;
pub mod config;
pub mod device;
pub mod dsp;
pub mod error;
pub mod events;
pub mod store;

pub use bus::{EventBus, Subscription};
pub use config::BridgeConfig;
pub use device::{
    format_hms, parse_hms, DeviceId, DeviceKind, DeviceSnapshot, PcmFormat, SampleFormat,
    TrackMetadata, TransportState,
};
pub use dsp::{BandType, CompressorConfig, DspConfig, EqBand, EqConfig, EqEngineKind, StereoConfig};
pub use error::{Error, Result};
pub use events::{Event, EventPayload, EventType, StateError};
pub use store::ConfigStore;
