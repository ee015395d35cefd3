//! The AirPlay sink: S16 PCM → ALAC packets → session transport.
//!
//! Volume maps 0..=100 onto the receiver's −30..0 dB scale (−144 dB is
//! the mute sentinel). When the session cannot set device volume the sink
//! falls back to digital gain applied before encoding.

use std::time::Duration;

use tracing::{debug, info, warn};

use airbridge_core::device::{PcmFormat, SampleFormat};
use airbridge_core::error::SinkError;

use crate::alac::AlacFramer;
use crate::session::{AirPlayEndpoint, AirPlaySession};
use crate::traits::{PcmChunk, Sink, WriteOutcome};

/// Bound on session establishment.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiver dB range for the 0..=100 volume scale.
const VOLUME_DB_MIN: f32 = -30.0;
const VOLUME_DB_MUTE: f32 = -144.0;

/// Map UPnP volume to the receiver dB scale.
fn volume_to_db(volume: u8) -> f32 {
    if volume == 0 {
        VOLUME_DB_MUTE
    } else {
        VOLUME_DB_MIN * (1.0 - volume.min(100) as f32 / 100.0)
    }
}

pub struct AirPlaySink {
    endpoint: AirPlayEndpoint,
    session: Box<dyn AirPlaySession>,
    framer: Option<AlacFramer>,
    volume: u8,
    muted: bool,
    /// Digital gain fallback when the session has no device volume.
    software_gain: Option<f32>,
    scratch: Vec<i16>,
}

impl AirPlaySink {
    pub fn new(endpoint: AirPlayEndpoint, session: Box<dyn AirPlaySession>) -> Self {
        Self {
            endpoint,
            session,
            framer: None,
            volume: 100,
            muted: false,
            software_gain: None,
            scratch: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> &AirPlayEndpoint {
        &self.endpoint
    }

    fn apply_volume(&mut self) -> Result<(), SinkError> {
        let db = if self.muted {
            VOLUME_DB_MUTE
        } else {
            volume_to_db(self.volume)
        };
        match self.session.set_volume_db(db) {
            Ok(()) => {
                self.software_gain = None;
                Ok(())
            }
            Err(err) => {
                // Session transport without device volume: attenuate the
                // samples instead.
                debug!(%err, "falling back to digital gain");
                let gain = if self.muted || self.volume == 0 {
                    0.0
                } else {
                    10f32.powf(volume_to_db(self.volume) / 20.0)
                };
                self.software_gain = Some(gain);
                Ok(())
            }
        }
    }
}

impl Sink for AirPlaySink {
    fn preferred_format(&self) -> SampleFormat {
        SampleFormat::S16Le
    }

    fn open(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        if format.sample != SampleFormat::S16Le {
            return Err(SinkError::UnsupportedFormat(
                "airplay sink takes S16LE input".into(),
            ));
        }
        info!(receiver = %self.endpoint.name, "opening airplay session");
        self.session.connect(OPEN_TIMEOUT)?;
        self.framer = Some(AlacFramer::new(format)?);
        self.apply_volume()?;
        Ok(())
    }

    fn write(&mut self, chunk: PcmChunk<'_>) -> Result<WriteOutcome, SinkError> {
        let PcmChunk::S16(samples) = chunk else {
            return Err(SinkError::UnsupportedFormat(
                "airplay sink takes S16LE input".into(),
            ));
        };
        let Some(framer) = self.framer.as_mut() else {
            return Ok(WriteOutcome::Closed);
        };

        let samples: &[i16] = if let Some(gain) = self.software_gain {
            self.scratch.clear();
            self.scratch
                .extend(samples.iter().map(|&s| (s as f32 * gain) as i16));
            &self.scratch
        } else {
            samples
        };

        let session = self.session.as_mut();
        let result = framer.push(samples, |packet, frames| {
            session.stream_packet(packet, frames)
        });
        match result {
            Ok(()) => Ok(WriteOutcome::Ok),
            Err(SinkError::Disconnected(reason)) => {
                warn!(receiver = %self.endpoint.name, %reason, "receiver went away");
                Ok(WriteOutcome::Closed)
            }
            Err(err) => Err(err),
        }
    }

    fn close(&mut self) {
        if let Some(mut framer) = self.framer.take() {
            let session = self.session.as_mut();
            if let Err(err) = framer.flush(|packet, frames| session.stream_packet(packet, frames))
            {
                debug!(%err, "flush on close failed");
            }
        }
        self.session.disconnect();
    }

    fn set_volume(&mut self, volume: u8) -> Result<(), SinkError> {
        self.volume = volume.min(100);
        self.apply_volume()
    }

    fn set_mute(&mut self, muted: bool) -> Result<(), SinkError> {
        self.muted = muted;
        self.apply_volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockAirPlaySession;
    use std::net::{IpAddr, Ipv4Addr};

    fn endpoint() -> AirPlayEndpoint {
        AirPlayEndpoint {
            identifier: "AA:BB:CC:DD:EE:FF".into(),
            name: "Kitchen".into(),
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)),
            port: 7000,
            model: Some("AudioAccessory5,1".into()),
        }
    }

    mod volume_curve {
        use super::*;

        #[test]
        fn endpoints_of_the_scale() {
            assert_eq!(volume_to_db(0), -144.0);
            assert_eq!(volume_to_db(100), 0.0);
            assert_eq!(volume_to_db(50), -15.0);
        }

        #[test]
        fn overrange_input_clamps() {
            assert_eq!(volume_to_db(200), 0.0);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn open_connects_and_applies_volume() {
            let mut session = MockAirPlaySession::new();
            session.expect_connect().times(1).returning(|_| Ok(()));
            session.expect_set_volume_db().times(1).returning(|_| Ok(()));
            session.expect_disconnect().times(1).return_const(());

            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            sink.open(PcmFormat::default()).unwrap();
            sink.close();
        }

        #[test]
        fn open_rejects_float_input() {
            let session = MockAirPlaySession::new();
            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            let mut format = PcmFormat::default();
            format.sample = SampleFormat::F32Le;
            assert!(sink.open(format).is_err());
        }

        #[test]
        fn write_before_open_is_closed() {
            let session = MockAirPlaySession::new();
            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            assert_eq!(
                sink.write(PcmChunk::S16(&[0; 704])).unwrap(),
                WriteOutcome::Closed
            );
        }
    }

    mod streaming {
        use super::*;

        #[test]
        fn full_packets_reach_the_session() {
            let mut session = MockAirPlaySession::new();
            session.expect_connect().returning(|_| Ok(()));
            session.expect_set_volume_db().returning(|_| Ok(()));
            session
                .expect_stream_packet()
                .times(2)
                .returning(|_, frames| {
                    assert_eq!(frames, 352);
                    Ok(())
                });

            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            sink.open(PcmFormat::default()).unwrap();
            // 704 frames stereo = two packets.
            assert_eq!(
                sink.write(PcmChunk::S16(&vec![100i16; 704 * 2])).unwrap(),
                WriteOutcome::Ok
            );
        }

        #[test]
        fn receiver_loss_surfaces_as_closed() {
            let mut session = MockAirPlaySession::new();
            session.expect_connect().returning(|_| Ok(()));
            session.expect_set_volume_db().returning(|_| Ok(()));
            session
                .expect_stream_packet()
                .returning(|_, _| Err(SinkError::Disconnected("gone".into())));

            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            sink.open(PcmFormat::default()).unwrap();
            assert_eq!(
                sink.write(PcmChunk::S16(&vec![0i16; 352 * 2])).unwrap(),
                WriteOutcome::Closed
            );
        }
    }

    mod volume {
        use super::*;

        #[test]
        fn idempotent_sets_reach_the_receiver_each_time() {
            let mut session = MockAirPlaySession::new();
            session.expect_connect().returning(|_| Ok(()));
            // One call from open, two explicit sets.
            session
                .expect_set_volume_db()
                .times(3)
                .returning(|db| {
                    assert!(db <= 0.0);
                    Ok(())
                });

            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            sink.open(PcmFormat::default()).unwrap();
            sink.set_volume(40).unwrap();
            sink.set_volume(40).unwrap();
        }

        #[test]
        fn session_without_volume_falls_back_to_digital_gain() {
            let mut session = MockAirPlaySession::new();
            session.expect_connect().returning(|_| Ok(()));
            session
                .expect_set_volume_db()
                .returning(|_| Err(SinkError::Backend("no volume".into())));
            session.expect_stream_packet().returning(|_, _| Ok(()));

            let mut sink = AirPlaySink::new(endpoint(), Box::new(session));
            sink.open(PcmFormat::default()).unwrap();
            sink.set_volume(50).unwrap();
            assert!(sink.software_gain.is_some());
            assert!(sink.software_gain.unwrap() < 1.0);

            sink.set_mute(true).unwrap();
            assert_eq!(sink.software_gain, Some(0.0));
        }
    }
}
