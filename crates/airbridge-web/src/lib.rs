//! # airbridge-web
//!
//! The web control API: read-only device state plus DSP and volume
//! command publication. Reads come from registry snapshots; writes are
//! commands on the bus, so this surface never touches device state
//! directly.

mod server;

pub use server::WebServer;
