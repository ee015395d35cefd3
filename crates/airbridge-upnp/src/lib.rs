//! # airbridge-upnp
//!
//! The UPnP MediaRenderer surface for every virtual device.
//!
//! This crate provides:
//! - SSDP discovery responder and periodic alive announcements
//! - Device and service description documents
//! - AVTransport / RenderingControl / ConnectionManager SOAP control,
//!   translated into command events on the bus
//! - GENA subscriptions with LastChange NOTIFY fan-out

mod didl;
mod gena;
mod net;
mod service;
mod soap;
mod ssdp;
mod xml;

pub use didl::parse_didl_metadata;
pub use gena::{GenaTable, NOTIFY_TIMEOUT};
pub use net::local_ip;
pub use service::UpnpService;
pub use ssdp::SsdpResponder;
pub use xml::{xml_escape, xml_unescape};
