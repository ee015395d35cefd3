//! Planar float audio blocks and integer conversions.

/// A block of audio: one `Vec<f32>` per channel, samples in [-1, 1].
///
/// The pipeline decodes interleaved PCM, converts to planar float for the
/// chain, and converts back for the sink. Integer samples divide by 32768
/// on entry and multiply by 32767 (clamped) on exit, so a round trip is
/// accurate to one quantization step.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    channels: Vec<Vec<f32>>,
}

const I16_IN_SCALE: f32 = 32768.0;
const I16_OUT_SCALE: f32 = 32767.0;

impl AudioBlock {
    /// An all-zero block.
    pub fn zeroed(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels],
        }
    }

    /// De-interleave 16-bit PCM into float channels.
    pub fn from_interleaved_i16(data: &[i16], channels: usize) -> Self {
        debug_assert!(channels > 0);
        let frames = data.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in data.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                planar[ch].push(sample as f32 / I16_IN_SCALE);
            }
        }
        Self { channels: planar }
    }

    /// De-interleave float PCM.
    pub fn from_interleaved_f32(data: &[f32], channels: usize) -> Self {
        debug_assert!(channels > 0);
        let frames = data.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in data.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                planar[ch].push(sample);
            }
        }
        Self { channels: planar }
    }

    /// Interleave back to 16-bit PCM, clamping to the i16 range.
    pub fn write_interleaved_i16(&self, out: &mut Vec<i16>) {
        out.clear();
        out.reserve(self.frames() * self.channel_count());
        for frame in 0..self.frames() {
            for ch in &self.channels {
                let scaled = (ch[frame] * I16_OUT_SCALE).round();
                out.push(scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            }
        }
    }

    /// Interleave back to float PCM, clamping to [-1, 1].
    pub fn write_interleaved_f32(&self, out: &mut Vec<f32>) {
        out.clear();
        out.reserve(self.frames() * self.channel_count());
        for frame in 0..self.frames() {
            for ch in &self.channels {
                out.push(ch[frame].clamp(-1.0, 1.0));
            }
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.channels[ch]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.channels[ch]
    }

    /// Mutable access to all channels at once (for mid/side math).
    pub fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod conversion {
        use super::*;

        #[test]
        fn i16_round_trip_stays_within_one_step() {
            let data: Vec<i16> = vec![0, 1, -1, 100, -100, i16::MAX, i16::MIN, 12345, -12345, 7];
            let block = AudioBlock::from_interleaved_i16(&data, 2);
            let mut out = Vec::new();
            block.write_interleaved_i16(&mut out);
            // Entry divides by 32768 and exit multiplies by 32767, so the
            // round trip may land one step off (i16::MIN comes back as
            // -32767), never more.
            for (a, b) in data.iter().zip(&out) {
                assert!((*a as i32 - *b as i32).abs() <= 1, "{a} vs {b}");
            }
        }

        #[test]
        fn float_to_i16_to_float_within_quantization() {
            let data: Vec<f32> = (0..2000).map(|i| ((i as f32) * 0.01).sin() * 0.4).collect();
            let block = AudioBlock::from_interleaved_f32(&data, 2);
            let mut ints = Vec::new();
            block.write_interleaved_i16(&mut ints);
            let back = AudioBlock::from_interleaved_i16(&ints, 2);
            let mut floats = Vec::new();
            back.write_interleaved_f32(&mut floats);
            for (a, b) in data.iter().zip(&floats) {
                assert!((a - b).abs() <= 1.0 / 32767.0, "{a} vs {b}");
            }
        }

        #[test]
        fn overrange_floats_clamp_instead_of_wrapping() {
            let block = AudioBlock::from_interleaved_f32(&[2.0, -2.0], 2);
            let mut out = Vec::new();
            block.write_interleaved_i16(&mut out);
            assert_eq!(out, vec![i16::MAX, i16::MIN]);
        }

        #[test]
        fn planar_layout_separates_channels() {
            let block = AudioBlock::from_interleaved_i16(&[100, -100, 200, -200], 2);
            assert_eq!(block.frames(), 2);
            assert!(block.channel(0).iter().all(|&s| s > 0.0));
            assert!(block.channel(1).iter().all(|&s| s < 0.0));
        }
    }
}
