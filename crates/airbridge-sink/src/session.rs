//! The AirPlay session contract.
//!
//! Discovery advertises receivers; a session carries negotiated audio to
//! one of them. Pairing, encryption, and RTSP negotiation live in the
//! external AirPlay library behind this trait; the bridge only needs
//! connect / stream / volume / disconnect. [`crate::RtpSession`] is the
//! packet-transport implementation wired in production; tests mock the
//! trait.

use std::net::IpAddr;
use std::time::Duration;

use airbridge_core::error::SinkError;

/// A discovered AirPlay receiver, as reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirPlayEndpoint {
    /// Stable receiver identifier (device id derivation input).
    pub identifier: String,
    /// Human-readable receiver name.
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    /// Receiver model string, when advertised.
    pub model: Option<String>,
}

/// One audio session to one receiver.
#[cfg_attr(test, mockall::automock)]
pub trait AirPlaySession: Send {
    /// Establish the session. Must complete within `timeout`.
    fn connect(&mut self, timeout: Duration) -> Result<(), SinkError>;

    /// Deliver one encoded audio packet covering `frames` frames, at the
    /// receiver's pacing (the call may block until the packet is due).
    fn stream_packet(&mut self, payload: &[u8], frames: u32) -> Result<(), SinkError>;

    /// Set the receiver volume in its native dB scale (−30..0, −144 =
    /// mute). Sessions without device-volume control return an error and
    /// the sink falls back to digital gain.
    fn set_volume_db(&mut self, db: f32) -> Result<(), SinkError>;

    /// Tear the session down. Idempotent.
    fn disconnect(&mut self);
}

/// Creates sessions for discovered endpoints; injected at composition so
/// the device layer never names a concrete session type.
pub trait SessionFactory: Send + Sync {
    fn create(&self, endpoint: &AirPlayEndpoint, sample_rate: u32) -> Box<dyn AirPlaySession>;
}

impl<F> SessionFactory for F
where
    F: Fn(&AirPlayEndpoint, u32) -> Box<dyn AirPlaySession> + Send + Sync,
{
    fn create(&self, endpoint: &AirPlayEndpoint, sample_rate: u32) -> Box<dyn AirPlaySession> {
        self(endpoint, sample_rate)
    }
}
