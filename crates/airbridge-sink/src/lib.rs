//! # airbridge-sink
//!
//! Polymorphic audio outputs for virtual devices.
//!
//! This crate provides:
//! - The [`Sink`] contract (`open/write/close/set_volume/set_mute`)
//! - The AirPlay sink: PCM → ALAC framing → paced RTP to the receiver,
//!   with the pairing/session library behind the [`AirPlaySession`] trait
//! - The local-speaker sink: a cpal output stream with software gain

mod airplay;
mod alac;
mod local;
mod rtp;
mod session;
mod traits;

pub use airplay::AirPlaySink;
pub use alac::{AlacFramer, FRAMES_PER_PACKET};
pub use local::LocalSink;
pub use rtp::{RtpHeader, RtpSession};
pub use session::{AirPlayEndpoint, AirPlaySession, SessionFactory};
pub use traits::{PcmChunk, Sink, WriteOutcome};
