//! Bridge configuration file.
//!
//! A single JSON document with the upper-case keys the deployment docs use.
//! Every key is optional; absent keys take the documented defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, Result};

fn default_true() -> bool {
    true
}

fn default_http_port() -> u16 {
    8088
}

fn default_web_port() -> u16 {
    8089
}

fn default_discovery_interval_s() -> u64 {
    30
}

fn default_buffer_gate_bytes() -> u64 {
    100 * 1024
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_offline_scan_threshold() -> u32 {
    3
}

/// Bridge-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Create the local-speaker virtual device.
    #[serde(rename = "ENABLE_SERVER_SPEAKER", default = "default_true")]
    pub enable_server_speaker: bool,

    /// UPnP description/control/event HTTP port.
    #[serde(rename = "HTTP_PORT", default = "default_http_port")]
    pub http_port: u16,

    /// Web control panel port.
    #[serde(rename = "WEB_PORT", default = "default_web_port")]
    pub web_port: u16,

    /// Seconds between AirPlay discovery scans.
    #[serde(rename = "DISCOVERY_INTERVAL_S", default = "default_discovery_interval_s")]
    pub discovery_interval_s: u64,

    /// Bytes the downloader must reach before the decoder starts.
    #[serde(rename = "BUFFER_GATE_BYTES", default = "default_buffer_gate_bytes")]
    pub buffer_gate_bytes: u64,

    /// Directory for per-session cache files.
    #[serde(rename = "CACHE_DIR", default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory for persisted per-device state.
    #[serde(rename = "STATE_DIR", default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Decoder output sample rate.
    #[serde(rename = "SAMPLE_RATE", default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Decoder output channel count.
    #[serde(rename = "CHANNELS", default = "default_channels")]
    pub channels: u16,

    /// Consecutive missed scans before a receiver's device is destroyed.
    #[serde(
        rename = "OFFLINE_SCAN_THRESHOLD",
        default = "default_offline_scan_threshold"
    )]
    pub offline_scan_threshold: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl BridgeConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    /// Ensure the cache and state directories exist and are writable.
    pub fn prepare_dirs(&self) -> Result<()> {
        for dir in [&self.cache_dir, &self.state_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|_| ConfigError::UnwritableDir(dir.display().to_string()))?;
            let probe = dir.join(".write-probe");
            std::fs::write(&probe, b"")
                .and_then(|_| std::fs::remove_file(&probe))
                .map_err(|_| ConfigError::UnwritableDir(dir.display().to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod defaults {
        use super::*;

        #[test]
        fn match_documented_values() {
            let cfg = BridgeConfig::default();
            assert!(cfg.enable_server_speaker);
            assert_eq!(cfg.http_port, 8088);
            assert_eq!(cfg.web_port, 8089);
            assert_eq!(cfg.discovery_interval_s, 30);
            assert_eq!(cfg.buffer_gate_bytes, 102_400);
            assert_eq!(cfg.sample_rate, 44_100);
            assert_eq!(cfg.channels, 2);
            assert_eq!(cfg.offline_scan_threshold, 3);
        }
    }

    mod loading {
        use super::*;

        #[test]
        fn missing_file_yields_defaults() {
            let dir = tempfile::tempdir().unwrap();
            let cfg = BridgeConfig::load(&dir.path().join("nope.json")).unwrap();
            assert_eq!(cfg.http_port, 8088);
        }

        #[test]
        fn recognizes_upper_case_keys() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(
                &path,
                r#"{ "HTTP_PORT": 9000, "ENABLE_SERVER_SPEAKER": false, "BUFFER_GATE_BYTES": 4096 }"#,
            )
            .unwrap();
            let cfg = BridgeConfig::load(&path).unwrap();
            assert_eq!(cfg.http_port, 9000);
            assert!(!cfg.enable_server_speaker);
            assert_eq!(cfg.buffer_gate_bytes, 4096);
            assert_eq!(cfg.web_port, 8089);
        }

        #[test]
        fn malformed_file_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(&path, "{ not json").unwrap();
            assert!(BridgeConfig::load(&path).is_err());
        }

        #[test]
        fn prepare_dirs_creates_cache_and_state() {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = BridgeConfig::default();
            cfg.cache_dir = dir.path().join("cache");
            cfg.state_dir = dir.path().join("state");
            cfg.prepare_dirs().unwrap();
            assert!(cfg.cache_dir.is_dir());
            assert!(cfg.state_dir.is_dir());
        }
    }
}
