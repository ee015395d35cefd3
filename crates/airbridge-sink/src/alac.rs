//! ALAC framing for the AirPlay sink.
//!
//! Buffers interleaved S16 PCM into 352-frame packets (the AirPlay
//! realtime packet size) and encodes each with the ALAC encoder.

use alac_encoder::{AlacEncoder, FormatDescription};

use airbridge_core::device::PcmFormat;
use airbridge_core::error::SinkError;

/// AirPlay realtime streams carry 352 frames per packet.
pub const FRAMES_PER_PACKET: u32 = 352;

/// PCM → ALAC packet framer.
pub struct AlacFramer {
    encoder: AlacEncoder,
    input_format: FormatDescription,
    channels: usize,
    buffer: Vec<i16>,
    output: Vec<u8>,
}

impl AlacFramer {
    pub fn new(format: PcmFormat) -> Result<Self, SinkError> {
        if format.channels == 0 {
            return Err(SinkError::UnsupportedFormat("zero channels".into()));
        }
        let alac_format = FormatDescription::alac(
            format.sample_rate as f64,
            FRAMES_PER_PACKET,
            format.channels as u32,
        );
        let input_format =
            FormatDescription::pcm::<i16>(format.sample_rate as f64, format.channels as u32);
        let encoder = AlacEncoder::new(&alac_format);

        // ALAC worst case is slightly larger than the raw PCM packet.
        let max_packet =
            FRAMES_PER_PACKET as usize * format.channels as usize * 2 + 256;

        Ok(Self {
            encoder,
            input_format,
            channels: format.channels as usize,
            buffer: Vec::new(),
            output: vec![0u8; max_packet],
        })
    }

    /// The ALAC magic cookie the session announces during setup.
    pub fn magic_cookie(&self) -> Vec<u8> {
        self.encoder.magic_cookie().to_vec()
    }

    fn samples_per_packet(&self) -> usize {
        FRAMES_PER_PACKET as usize * self.channels
    }

    fn encode_packet(
        &mut self,
        samples: &[i16],
        emit: &mut dyn FnMut(&[u8], u32) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        let frames = (samples.len() / self.channels) as u32;
        let input_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let encoded = self
            .encoder
            .encode(&self.input_format, &input_bytes, &mut self.output);
        emit(&self.output[..encoded], frames)
    }

    /// Feed PCM; `emit` is called once per completed packet with the
    /// encoded bytes and the frame count it covers.
    pub fn push(
        &mut self,
        samples: &[i16],
        mut emit: impl FnMut(&[u8], u32) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        self.buffer.extend_from_slice(samples);
        while self.buffer.len() >= self.samples_per_packet() {
            let per_packet = self.samples_per_packet();
            let packet: Vec<i16> = self.buffer.drain(..per_packet).collect();
            self.encode_packet(&packet, &mut emit)?;
        }
        Ok(())
    }

    /// Encode whatever remains, zero-padded to a full packet.
    pub fn flush(
        &mut self,
        mut emit: impl FnMut(&[u8], u32) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let per_packet = self.samples_per_packet();
        self.buffer.resize(per_packet, 0);
        let packet: Vec<i16> = self.buffer.drain(..).collect();
        self.encode_packet(&packet, &mut emit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> AlacFramer {
        AlacFramer::new(PcmFormat::default()).unwrap()
    }

    mod framing {
        use super::*;

        #[test]
        fn short_input_emits_nothing() {
            let mut f = framer();
            let mut packets = 0;
            f.push(&[0i16; 100], |_, _| {
                packets += 1;
                Ok(())
            })
            .unwrap();
            assert_eq!(packets, 0);
        }

        #[test]
        fn a_full_packet_of_frames_emits_one_packet() {
            let mut f = framer();
            let mut emitted = Vec::new();
            f.push(&vec![1000i16; 352 * 2], |data, frames| {
                emitted.push((data.len(), frames));
                Ok(())
            })
            .unwrap();
            assert_eq!(emitted.len(), 1);
            assert_eq!(emitted[0].1, 352);
            assert!(emitted[0].0 > 0);
        }

        #[test]
        fn residue_carries_to_the_next_push() {
            let mut f = framer();
            let mut packets = 0;
            // 300 + 52 frames = exactly one packet.
            f.push(&vec![0i16; 300 * 2], |_, _| {
                packets += 1;
                Ok(())
            })
            .unwrap();
            assert_eq!(packets, 0);
            f.push(&vec![0i16; 52 * 2], |_, _| {
                packets += 1;
                Ok(())
            })
            .unwrap();
            assert_eq!(packets, 1);
        }

        #[test]
        fn flush_pads_and_emits_the_tail() {
            let mut f = framer();
            f.push(&vec![500i16; 100 * 2], |_, _| Ok(())).unwrap();
            let mut frames_out = 0;
            f.flush(|_, frames| {
                frames_out = frames;
                Ok(())
            })
            .unwrap();
            assert_eq!(frames_out, 352);
            // Nothing left after flush.
            f.flush(|_, _| panic!("empty framer must not emit")).unwrap();
        }

        #[test]
        fn magic_cookie_is_nonempty() {
            assert!(!framer().magic_cookie().is_empty());
        }

        #[test]
        fn emit_errors_propagate() {
            let mut f = framer();
            let result = f.push(&vec![0i16; 352 * 2], |_, _| {
                Err(SinkError::Closed)
            });
            assert!(matches!(result, Err(SinkError::Closed)));
        }
    }
}
