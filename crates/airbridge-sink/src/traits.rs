//! The sink contract shared by all audio outputs.

use airbridge_core::device::{PcmFormat, SampleFormat};
use airbridge_core::error::SinkError;

/// One block of interleaved PCM on its way to a sink.
#[derive(Debug, Clone, Copy)]
pub enum PcmChunk<'a> {
    S16(&'a [i16]),
    F32(&'a [f32]),
}

impl PcmChunk<'_> {
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            Self::S16(_) => SampleFormat::S16Le,
            Self::F32(_) => SampleFormat::F32Le,
        }
    }

    pub fn frames(&self, channels: usize) -> usize {
        let samples = match self {
            Self::S16(data) => data.len(),
            Self::F32(data) => data.len(),
        };
        samples / channels.max(1)
    }
}

/// Result of a non-blocking sink write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The block was accepted.
    Ok,
    /// The sink cannot take more right now; retry the same block. This is
    /// the backpressure signal that stalls the decoder loop; frames are
    /// never dropped.
    Overrun,
    /// The sink stream has ended (receiver gone, device lost).
    Closed,
}

/// An audio output owned by exactly one virtual device. A session opens
/// the sink, writes blocks, and closes it; exclusive access via `&mut`
/// stands in for the session token.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send {
    /// The sample encoding this sink wants the decoder to produce.
    fn preferred_format(&self) -> SampleFormat;

    /// Begin an output session. Bounded internally (default 5 s) for
    /// sinks that negotiate with a remote receiver.
    fn open(&mut self, format: PcmFormat) -> Result<(), SinkError>;

    /// Write one block.
    fn write<'a>(&mut self, chunk: PcmChunk<'a>) -> Result<WriteOutcome, SinkError>;

    /// End the output session, flushing or discarding per sink policy.
    /// Idempotent; errors are handled internally (tear-down never fails).
    fn close(&mut self);

    /// Volume 0..=100. Setting the current value again is a no-op at the
    /// device but must still succeed.
    fn set_volume(&mut self, volume: u8) -> Result<(), SinkError>;

    fn set_mute(&mut self, muted: bool) -> Result<(), SinkError>;
}
