//! Media inspection via ffprobe.
//!
//! Used by SetAVTransportURI to fill in duration and stream parameters
//! when the DIDL-Lite metadata omits them. Probing is best-effort: a
//! failure is logged by the caller and never blocks playback.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use airbridge_core::error::{Error, Result};

/// Stream facts extracted from ffprobe output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u64,
    pub duration_s: f64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    channels: Option<u16>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

fn parse_output(json: &str) -> Result<MediaInfo> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|e| Error::Probe(e.to_string()))?;

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "audio");

    let mut info = MediaInfo::default();
    if let Some(stream) = audio {
        info.codec = stream.codec_name.clone();
        info.sample_rate = stream
            .sample_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        info.channels = stream.channels.unwrap_or(0);
        info.bit_rate = stream
            .bit_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
    }
    if let Some(format) = parsed.format {
        info.duration_s = format
            .duration
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        if info.bit_rate == 0 {
            info.bit_rate = format
                .bit_rate
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
        }
    }
    Ok(info)
}

/// Probe a URL or file with ffprobe, bounded by `timeout`.
pub async fn probe_url(url: &str, timeout: Duration) -> Result<MediaInfo> {
    let mut cmd = tokio::process::Command::new("ffprobe");
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        url,
    ])
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::null())
    .kill_on_drop(true);

    debug!(url, "probing media");
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| Error::Timeout)??;

    let json = String::from_utf8_lossy(&output.stdout);
    parse_output(&json)
}
