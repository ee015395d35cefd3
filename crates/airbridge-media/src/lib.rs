//! # airbridge-media
//!
//! ffmpeg-backed media plumbing for the bridge pipeline.
//!
//! This crate provides:
//! - Remux-copy downloading of a remote URL into a session cache file
//! - PCM decoding of the (possibly still growing) cache file
//! - Cache file naming and cleanup
//! - ffprobe media inspection
//! - ffmpeg availability checking

mod cache;
mod decoder;
mod downloader;
mod probe;
mod process;

pub use cache::CacheFile;
pub use decoder::{Decoder, DecoderSettings, ReadOutcome};
pub use downloader::{DownloadHandle, DownloadStatus, Downloader};
pub use probe::{probe_url, MediaInfo};
pub use process::{check_ffmpeg, terminate_child};
