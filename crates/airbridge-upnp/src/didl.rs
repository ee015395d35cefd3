//! DIDL-Lite metadata extraction.
//!
//! Controllers differ wildly in what they send: plain elements, CDATA
//! wrappers, `dc:creator` instead of `upnp:artist`, durations as a `res`
//! attribute. Extraction is tolerant by regex rather than a strict XML
//! parse, matching what the clients actually emit.

use std::sync::LazyLock;

use regex::Regex;

use airbridge_core::device::{parse_hms, TrackMetadata};

use crate::xml::xml_unescape;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<dc:title>([^<]+)</dc:title>").unwrap());
static TITLE_CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<dc:title><!\[CDATA\[(.*?)\]\]></dc:title>").unwrap());
static ARTIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<upnp:artist[^>]*>([^<]+)</upnp:artist>").unwrap());
static ARTIST_CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<upnp:artist[^>]*><!\[CDATA\[(.*?)\]\]></upnp:artist>").unwrap());
static CREATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<dc:creator>([^<]+)</dc:creator>").unwrap());
static ALBUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<upnp:album>([^<]+)</upnp:album>").unwrap());
static ALBUM_CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<upnp:album><!\[CDATA\[(.*?)\]\]></upnp:album>").unwrap());
static ALBUM_ART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<upnp:albumArtURI[^>]*>([^<]+)</upnp:albumArtURI>").unwrap());
static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"duration="([^"]+)""#).unwrap());

fn capture(regex: &Regex, didl: &str) -> Option<String> {
    regex
        .captures(didl)
        .map(|c| xml_unescape(c[1].trim()))
        .filter(|s| !s.is_empty())
}

/// Extract track metadata from a DIDL-Lite document (already unescaped
/// from its SOAP envelope). Returns `None` for empty or metadata-free
/// input.
pub fn parse_didl_metadata(didl: &str) -> Option<TrackMetadata> {
    if didl.trim().is_empty() {
        return None;
    }
    let metadata = TrackMetadata {
        title: capture(&TITLE, didl).or_else(|| capture(&TITLE_CDATA, didl)),
        artist: capture(&ARTIST, didl)
            .or_else(|| capture(&ARTIST_CDATA, didl))
            .or_else(|| capture(&CREATOR, didl)),
        album: capture(&ALBUM, didl).or_else(|| capture(&ALBUM_CDATA, didl)),
        cover_url: capture(&ALBUM_ART, didl),
        duration_s: capture(&DURATION, didl)
            .map(|d| parse_hms(&d))
            .unwrap_or(0.0),
    };
    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}
