//! Error types for the airbridge engine.

use thiserror::Error;

/// Primary error type for all bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("dsp error: {0}")]
    Dsp(#[from] DspError),

    #[error("upnp error: {0}")]
    Upnp(#[from] UpnpError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("media probe failed: {0}")]
    Probe(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("operation timed out")]
    Timeout,
}

/// Errors while pulling a remote URL into the cache file.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to spawn downloader: {0}")]
    Spawn(std::io::Error),

    #[error("downloader exited with status {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("buffer gate not reached within {0} seconds")]
    BufferGateTimeout(u64),

    #[error("download cancelled")]
    Cancelled,
}

/// Errors while decoding the cache file to PCM.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to spawn decoder: {0}")]
    Spawn(std::io::Error),

    #[error("decoder exited unexpectedly with status {0}")]
    Crashed(i32),

    #[error("decoder pipe error: {0}")]
    Pipe(std::io::Error),
}

/// Errors from an audio sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink open timed out after {0:?}")]
    OpenTimeout(std::time::Duration),

    #[error("sink is closed")]
    Closed,

    #[error("receiver disconnected: {0}")]
    Disconnected(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("no audio output device available")]
    NoOutputDevice,

    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink backend error: {0}")]
    Backend(String),
}

/// Errors from DSP configuration or processing.
#[derive(Error, Debug)]
pub enum DspError {
    #[error("invalid eq band {index}: {reason}")]
    InvalidBand { index: usize, reason: String },

    #[error("invalid dsp config: {0}")]
    InvalidConfig(String),
}

/// Errors from the UPnP surface.
#[derive(Error, Debug)]
pub enum UpnpError {
    #[error("failed to bind {what} on port {port}: {source}")]
    Bind {
        what: &'static str,
        port: u16,
        source: std::io::Error,
    },

    #[error("malformed SOAP request: {0}")]
    Soap(String),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("notify delivery failed: {0}")]
    Notify(String),
}

/// Errors loading or persisting configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("directory {0} is not writable")]
    UnwritableDir(String),

    #[error("required binary not available: {0}")]
    MissingBinary(String),
}

/// Convenience result alias used throughout airbridge.
pub type Result<T> = std::result::Result<T, Error>;
