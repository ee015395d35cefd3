//! Virtual device representation: identity, transport state, and formats.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dsp::DspConfig;

/// Stable identifier of a virtual device.
///
/// AirPlay-backed devices derive their id deterministically from the
/// receiver's advertised identifier so the id (and the UPnP UDN built from
/// it) survives restarts. The local speaker uses a fixed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub const LOCAL_SPEAKER: &'static str = "server-speaker";

    /// Derive a device id from an AirPlay receiver identifier.
    pub fn from_airplay(identifier: &str) -> Self {
        let digest = md5::compute(identifier.as_bytes());
        Self(format!("{:x}", digest)[..16].to_string())
    }

    /// The fixed id of the local-speaker device.
    pub fn local_speaker() -> Self {
        Self(Self::LOCAL_SPEAKER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The UPnP UDN for this device, stable across restarts.
    pub fn udn(&self) -> String {
        format!("uuid:airbridge-{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of sink backs a virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    AirPlay,
    LocalSpeaker,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AirPlay => "airplay",
            Self::LocalSpeaker => "local_speaker",
        }
    }
}

/// UPnP AVTransport transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    NoMediaPresent,
    Stopped,
    Playing,
    PausedPlayback,
    Transitioning,
}

impl TransportState {
    /// The UPnP state variable value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMediaPresent => "NO_MEDIA_PRESENT",
            Self::Stopped => "STOPPED",
            Self::Playing => "PLAYING",
            Self::PausedPlayback => "PAUSED_PLAYBACK",
            Self::Transitioning => "TRANSITIONING",
        }
    }

    /// Actions a control point may issue in this state, for
    /// `GetCurrentTransportActions` and LastChange events.
    pub fn available_actions(&self) -> &'static str {
        match self {
            Self::Playing => "Pause,Stop,Seek",
            Self::PausedPlayback => "Play,Stop",
            Self::Transitioning => "Stop",
            Self::Stopped | Self::NoMediaPresent => "Play",
        }
    }
}

/// Track metadata carried by SetAVTransportURI / Play.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Track duration in seconds; 0.0 means unknown.
    #[serde(default)]
    pub duration_s: f64,
}

impl TrackMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.cover_url.is_none()
            && self.duration_s == 0.0
    }
}

/// PCM sample encoding on the decoder pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed little endian (AirPlay path).
    S16Le,
    /// 32-bit float little endian (local speaker path).
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::F32Le => 4,
        }
    }

    /// The ffmpeg audio codec name for this format.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::S16Le => "pcm_s16le",
            Self::F32Le => "pcm_f32le",
        }
    }

    /// The ffmpeg raw muxer name for this format.
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::S16Le => "s16le",
            Self::F32Le => "f32le",
        }
    }

    pub fn bit_depth(&self) -> u8 {
        match self {
            Self::S16Le => 16,
            Self::F32Le => 32,
        }
    }
}

/// Interleaved PCM stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample: SampleFormat,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, sample: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample.bytes_per_sample()
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            sample: SampleFormat::S16Le,
        }
    }
}

/// Point-in-time snapshot of a virtual device, served to the UPnP and web
/// surfaces. Written only by the device's command task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub transport_state: TransportState,
    pub uri: String,
    pub metadata: TrackMetadata,
    pub elapsed_s: f64,
    pub duration_s: f64,
    pub volume: u8,
    pub muted: bool,
    pub dsp_enabled: bool,
    pub dsp_config: DspConfig,
    pub pcm: PcmFormat,
    pub session_id: u64,
    pub connected: bool,
}

impl DeviceSnapshot {
    pub fn new(device_id: DeviceId, name: String, kind: DeviceKind) -> Self {
        let transport_state = TransportState::NoMediaPresent;
        Self {
            device_id,
            name,
            kind,
            transport_state,
            uri: String::new(),
            metadata: TrackMetadata::default(),
            elapsed_s: 0.0,
            duration_s: 0.0,
            volume: 100,
            muted: false,
            dsp_enabled: false,
            dsp_config: DspConfig::default(),
            pcm: PcmFormat::default(),
            session_id: 0,
            connected: false,
        }
    }
}

/// Format seconds as the `hh:mm:ss` string UPnP time fields use.
pub fn format_hms(seconds: f64) -> String {
    if seconds <= 0.0 || !seconds.is_finite() {
        return "00:00:00".to_string();
    }
    let total = seconds as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Parse a UPnP `hh:mm:ss[.frac]` (or `mm:ss`, or bare seconds) time string.
pub fn parse_hms(text: &str) -> f64 {
    let parts: Vec<&str> = text.trim().split(':').collect();
    let parse = |s: &str| s.parse::<f64>().unwrap_or(0.0);
    match parts.as_slice() {
        [h, m, s] => parse(h) * 3600.0 + parse(m) * 60.0 + parse(s),
        [m, s] => parse(m) * 60.0 + parse(s),
        [s] => parse(s),
        _ => 0.0,
    }
}
