//! # airbridge-device
//!
//! The per-sink bridge engine and its lifecycle management.
//!
//! This crate provides:
//! - The virtual device: one command task per device running the
//!   AVTransport state machine and publishing all state events
//! - The session pipeline: downloader + decoder → DSP → sink threads with
//!   buffer-gated start and bounded tear-down
//! - The device registry serving snapshots to the UPnP and web surfaces
//! - mDNS receiver scanning and the device manager

mod manager;
mod pipeline;
mod registry;
mod scanner;
mod virtual_device;

pub use manager::{DeviceManager, ManagerSettings, SinkFactory};
pub use pipeline::{
    PipelineEvent, PipelineEventKind, PipelineSettings, SessionPipeline, SharedDsp, SharedSink,
};
pub use registry::DeviceRegistry;
pub use scanner::{MdnsScanner, ReceiverScanner};
pub use virtual_device::{DeviceHandle, DeviceSpec, VirtualDevice};
