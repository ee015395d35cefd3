//! RTP audio transport with deadline pacing.
//!
//! Carries encoded packets to the receiver over UDP at the rate the
//! receiver consumes them: each packet advances a monotonic deadline by
//! `frames / sample_rate` and the sender sleeps until that deadline. This
//! is the packet-transport half of an AirPlay session; pairing and RTSP
//! negotiation belong to the external library behind
//! [`crate::AirPlaySession`].

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace};

use airbridge_core::error::SinkError;

use crate::session::AirPlaySession;

/// RTP payload type for realtime AirPlay audio.
pub const PAYLOAD_TYPE_AUDIO: u8 = 96;

/// RTP header (12 bytes).
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize to the 12-byte wire form (version 2, no padding,
    /// no extension, no CSRCs).
    pub fn serialize(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = 2 << 6;
        buf[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Parse the 12-byte wire form (used by tests and diagnostics).
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 12 || data[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// Paced RTP sender implementing the session packet transport.
pub struct RtpSession {
    dest: SocketAddr,
    sample_rate: u32,
    socket: Option<UdpSocket>,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    first_packet: bool,
    next_deadline: Option<Instant>,
}

impl RtpSession {
    pub fn new(dest: SocketAddr, sample_rate: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            dest,
            sample_rate,
            socket: None,
            sequence: rng.gen(),
            timestamp: rng.gen(),
            ssrc: rng.gen(),
            first_packet: true,
            next_deadline: None,
        }
    }

    fn socket(&self) -> Result<&UdpSocket, SinkError> {
        self.socket.as_ref().ok_or(SinkError::Closed)
    }
}

impl AirPlaySession for RtpSession {
    fn connect(&mut self, _timeout: Duration) -> Result<(), SinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(self.dest)?;
        debug!(dest = %self.dest, "rtp session connected");
        self.socket = Some(socket);
        self.first_packet = true;
        self.next_deadline = None;
        Ok(())
    }

    fn stream_packet(&mut self, payload: &[u8], frames: u32) -> Result<(), SinkError> {
        // Pace: wait until the previous packet's playout deadline.
        if let Some(deadline) = self.next_deadline {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }

        let header = RtpHeader {
            payload_type: PAYLOAD_TYPE_AUDIO,
            marker: self.first_packet,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        };
        let mut wire = Vec::with_capacity(12 + payload.len());
        wire.extend_from_slice(&header.serialize());
        wire.extend_from_slice(payload);
        self.socket()?
            .send(&wire)
            .map_err(|e| SinkError::Disconnected(e.to_string()))?;
        trace!(seq = self.sequence, frames, "rtp packet sent");

        self.first_packet = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);

        let packet_duration =
            Duration::from_secs_f64(frames as f64 / self.sample_rate as f64);
        let base = self.next_deadline.unwrap_or_else(Instant::now);
        self.next_deadline = Some(base + packet_duration);
        Ok(())
    }

    fn set_volume_db(&mut self, _db: f32) -> Result<(), SinkError> {
        // Device volume rides the RTSP control channel owned by the
        // session library; this transport cannot set it.
        Err(SinkError::Backend(
            "rtp transport has no device volume control".into(),
        ))
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!(dest = %self.dest, "rtp session disconnected");
        }
        self.next_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod header {
        use super::*;

        #[test]
        fn round_trips_through_the_wire_form() {
            let header = RtpHeader {
                payload_type: PAYLOAD_TYPE_AUDIO,
                marker: true,
                sequence: 0xBEEF,
                timestamp: 0xDEAD_CAFE,
                ssrc: 0x1234_5678,
            };
            let parsed = RtpHeader::parse(&header.serialize()).unwrap();
            assert_eq!(parsed.payload_type, PAYLOAD_TYPE_AUDIO);
            assert!(parsed.marker);
            assert_eq!(parsed.sequence, 0xBEEF);
            assert_eq!(parsed.timestamp, 0xDEAD_CAFE);
            assert_eq!(parsed.ssrc, 0x1234_5678);
        }

        #[test]
        fn rejects_short_or_wrong_version_data() {
            assert!(RtpHeader::parse(&[0u8; 4]).is_none());
            assert!(RtpHeader::parse(&[0u8; 12]).is_none());
        }
    }

    mod sessions {
        use super::*;

        fn local_receiver() -> (UdpSocket, SocketAddr) {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            let addr = socket.local_addr().unwrap();
            socket
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            (socket, addr)
        }

        #[test]
        fn packets_arrive_with_increasing_sequence_and_timestamp() {
            let (receiver, addr) = local_receiver();
            let mut session = RtpSession::new(addr, 44_100);
            session.connect(Duration::from_secs(5)).unwrap();

            session.stream_packet(&[1, 2, 3], 352).unwrap();
            session.stream_packet(&[4, 5, 6], 352).unwrap();

            let mut buf = [0u8; 1500];
            let n1 = receiver.recv(&mut buf).unwrap();
            let h1 = RtpHeader::parse(&buf[..n1]).unwrap();
            assert!(h1.marker, "first packet carries the marker bit");
            assert_eq!(&buf[12..n1], &[1, 2, 3]);

            let n2 = receiver.recv(&mut buf).unwrap();
            let h2 = RtpHeader::parse(&buf[..n2]).unwrap();
            assert!(!h2.marker);
            assert_eq!(h2.sequence, h1.sequence.wrapping_add(1));
            assert_eq!(h2.timestamp, h1.timestamp.wrapping_add(352));

            session.disconnect();
        }

        #[test]
        fn pacing_spaces_packets_by_frame_duration() {
            let (_receiver, addr) = local_receiver();
            let mut session = RtpSession::new(addr, 44_100);
            session.connect(Duration::from_secs(5)).unwrap();

            let start = Instant::now();
            // 10 packets of 352 frames ≈ 80 ms of audio; the first is
            // free, so at least ~70 ms must elapse.
            for _ in 0..10 {
                session.stream_packet(&[0u8; 32], 352).unwrap();
            }
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(60), "elapsed {elapsed:?}");
        }

        #[test]
        fn streaming_without_connect_reports_closed() {
            let mut session = RtpSession::new("127.0.0.1:9".parse().unwrap(), 44_100);
            assert!(matches!(
                session.stream_packet(&[0u8; 4], 352),
                Err(SinkError::Closed)
            ));
        }

        #[test]
        fn volume_is_delegated_to_the_session_library() {
            let mut session = RtpSession::new("127.0.0.1:9".parse().unwrap(), 44_100);
            assert!(session.set_volume_db(-15.0).is_err());
        }
    }
}
