//! Typed command and state events.
//!
//! Events are the only communication mechanism between components: the
//! UPnP and web surfaces publish command events, the virtual device is the
//! only executor and the only publisher of state events.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, DeviceSnapshot, TrackMetadata, TransportState};
use crate::dsp::DspConfig;

/// Event topics subscribers register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Commands: published by DLNA service / web server, consumed by the
    // device's command task.
    CmdSetUri,
    CmdPlay,
    CmdStop,
    CmdPause,
    CmdSeek,
    CmdSetVolume,
    CmdSetMute,
    CmdSetDsp,
    CmdResetDsp,

    // State: published by the virtual device.
    StateChanged,
    PositionUpdated,
    MetadataUpdated,
    DspChanged,
    VolumeChanged,

    // Lifecycle: published by the device manager.
    DeviceAdded,
    DeviceRemoved,
}

impl EventType {
    /// All command topics, in one slice for device subscriptions.
    pub const COMMANDS: &'static [EventType] = &[
        EventType::CmdSetUri,
        EventType::CmdPlay,
        EventType::CmdStop,
        EventType::CmdPause,
        EventType::CmdSeek,
        EventType::CmdSetVolume,
        EventType::CmdSetMute,
        EventType::CmdSetDsp,
        EventType::CmdResetDsp,
    ];
}

/// Error class carried on a STOPPED state event after a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateError {
    UpstreamFetch,
    DecoderFailure,
    SinkFailure,
}

impl StateError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamFetch => "upstream_fetch",
            Self::DecoderFailure => "decoder_failure",
            Self::SinkFailure => "sink_failure",
        }
    }
}

/// Event payload; the variant determines the [`EventType`] topic.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Play {
        uri: Option<String>,
        position_s: f64,
        metadata: Option<TrackMetadata>,
    },
    Stop,
    Pause,
    Seek {
        position_s: f64,
    },
    SetUri {
        uri: String,
        metadata: Option<TrackMetadata>,
    },
    SetVolume {
        volume: u8,
    },
    SetMute {
        muted: bool,
    },
    SetDsp {
        enabled: bool,
        config: Option<DspConfig>,
    },
    ResetDsp,

    StateChanged {
        state: TransportState,
        uri: String,
        session_id: u64,
        elapsed_s: f64,
        error: Option<StateError>,
    },
    PositionUpdated {
        position_s: f64,
        duration_s: f64,
    },
    MetadataUpdated {
        metadata: TrackMetadata,
    },
    DspChanged {
        enabled: bool,
        config: DspConfig,
    },
    VolumeChanged {
        volume: u8,
        muted: bool,
    },

    DeviceAdded {
        snapshot: Box<DeviceSnapshot>,
    },
    DeviceRemoved,
}

impl EventPayload {
    /// The topic this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SetUri { .. } => EventType::CmdSetUri,
            Self::Play { .. } => EventType::CmdPlay,
            Self::Stop => EventType::CmdStop,
            Self::Pause => EventType::CmdPause,
            Self::Seek { .. } => EventType::CmdSeek,
            Self::SetVolume { .. } => EventType::CmdSetVolume,
            Self::SetMute { .. } => EventType::CmdSetMute,
            Self::SetDsp { .. } => EventType::CmdSetDsp,
            Self::ResetDsp => EventType::CmdResetDsp,
            Self::StateChanged { .. } => EventType::StateChanged,
            Self::PositionUpdated { .. } => EventType::PositionUpdated,
            Self::MetadataUpdated { .. } => EventType::MetadataUpdated,
            Self::DspChanged { .. } => EventType::DspChanged,
            Self::VolumeChanged { .. } => EventType::VolumeChanged,
            Self::DeviceAdded { .. } => EventType::DeviceAdded,
            Self::DeviceRemoved => EventType::DeviceRemoved,
        }
    }
}

/// An event on the bus: an optional target device plus a payload.
///
/// `device_id` of `None` is a broadcast (device lifecycle events carry the
/// subject device id; commands always target one device).
#[derive(Debug, Clone)]
pub struct Event {
    pub device_id: Option<DeviceId>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(device_id: DeviceId, payload: EventPayload) -> Self {
        Self {
            device_id: Some(device_id),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    // Command constructors, mirroring what the UPnP/web surfaces publish.

    pub fn play(device_id: DeviceId, uri: Option<String>, position_s: f64) -> Self {
        Self::new(
            device_id,
            EventPayload::Play {
                uri,
                position_s,
                metadata: None,
            },
        )
    }

    pub fn stop(device_id: DeviceId) -> Self {
        Self::new(device_id, EventPayload::Stop)
    }

    pub fn pause(device_id: DeviceId) -> Self {
        Self::new(device_id, EventPayload::Pause)
    }

    pub fn seek(device_id: DeviceId, position_s: f64) -> Self {
        Self::new(device_id, EventPayload::Seek { position_s })
    }

    pub fn set_uri(device_id: DeviceId, uri: String, metadata: Option<TrackMetadata>) -> Self {
        Self::new(device_id, EventPayload::SetUri { uri, metadata })
    }

    pub fn set_volume(device_id: DeviceId, volume: u8) -> Self {
        Self::new(device_id, EventPayload::SetVolume { volume })
    }

    pub fn set_mute(device_id: DeviceId, muted: bool) -> Self {
        Self::new(device_id, EventPayload::SetMute { muted })
    }

    pub fn set_dsp(device_id: DeviceId, enabled: bool, config: Option<DspConfig>) -> Self {
        Self::new(device_id, EventPayload::SetDsp { enabled, config })
    }

    pub fn reset_dsp(device_id: DeviceId) -> Self {
        Self::new(device_id, EventPayload::ResetDsp)
    }
}
