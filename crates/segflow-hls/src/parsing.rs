#![forbid(unsafe_code)]

//! HLS playlist parsing.
//!
//! `hls_m3u8` does the heavy lifting. A light line scan covers the tags the
//! walker needs verbatim: byte ranges, playlist type, end list and the
//! markers that make a playlist unplayable.

use std::{collections::HashMap, time::Duration};

use hls_m3u8::{
    Decryptable, MasterPlaylist as HlsMasterPlaylist, MediaPlaylist as HlsMediaPlaylist,
    tags::VariantStream as HlsVariantStreamTag, types::DecryptionKey as HlsDecryptionKey,
};
use segflow_net::RangeSpec;
use url::Url;

use crate::{HlsError, HlsResult};

/// `#EXT-X-PLAYLIST-TYPE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

/// AES-128 key of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub uri: Url,
    pub iv: Option<[u8; 16]>,
}

/// One media segment entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSegment {
    /// Media sequence number plus position in the playlist.
    pub sequence: u64,
    /// Absolute segment URL.
    pub uri: Url,
    pub duration: Duration,
    /// Resolved `#EXT-X-BYTERANGE`.
    pub byte_range: Option<RangeSpec>,
    pub key: Option<KeyInfo>,
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPlaylist {
    pub segments: Vec<MediaSegment>,
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub end_list: bool,
    pub playlist_type: Option<PlaylistType>,
}

impl MediaPlaylist {
    /// Finished playlist whose segments never change.
    pub fn is_complete(&self) -> bool {
        self.end_list && self.playlist_type.is_some()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.segments.iter().map(|s| s.sequence)
    }
}

/// Tags read straight from the playlist text.
#[derive(Debug, Default)]
struct RawTags {
    is_master: bool,
    i_frames_only: bool,
    end_list: bool,
    playlist_type: Option<PlaylistType>,
    /// `(length, offset)` per segment URI line, in playlist order.
    byte_ranges: Vec<Option<(u64, Option<u64>)>>,
    /// `VIDEO` group per `#EXT-X-STREAM-INF`, in playlist order.
    stream_video_groups: Vec<Option<String>>,
    /// `NAME` of `TYPE=VIDEO` renditions by group id.
    video_names: HashMap<String, String>,
}

fn scan_tags(input: &str) -> HlsResult<RawTags> {
    let mut tags = RawTags::default();
    let mut pending_range = None;

    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !line.starts_with('#') {
            tags.byte_ranges.push(pending_range.take());
            continue;
        }
        let (tag, value) = line.split_once(':').unwrap_or((line, ""));
        match tag {
            "#EXT-X-STREAM-INF" => {
                tags.is_master = true;
                tags.stream_video_groups
                    .push(attribute(value, "VIDEO").map(str::to_owned));
            }
            "#EXT-X-I-FRAMES-ONLY" => tags.i_frames_only = true,
            "#EXT-X-ENDLIST" => tags.end_list = true,
            "#EXT-X-PLAYLIST-TYPE" => {
                tags.playlist_type = match value.trim() {
                    "VOD" => Some(PlaylistType::Vod),
                    "EVENT" => Some(PlaylistType::Event),
                    _ => None,
                };
            }
            "#EXT-X-BYTERANGE" => pending_range = Some(parse_byte_range(value)?),
            "#EXT-X-MEDIA" => {
                if attribute(value, "TYPE") == Some("VIDEO")
                    && let (Some(group), Some(name)) =
                        (attribute(value, "GROUP-ID"), attribute(value, "NAME"))
                {
                    tags.video_names.insert(group.to_owned(), name.to_owned());
                }
            }
            _ => {}
        }
    }
    Ok(tags)
}

/// `<n>[@<o>]`
fn parse_byte_range(value: &str) -> HlsResult<(u64, Option<u64>)> {
    let invalid = || HlsError::PlaylistParse(format!("invalid byte range `{value}`"));
    let (len, offset) = match value.trim().split_once('@') {
        Some((len, offset)) => (len, Some(offset.parse().map_err(|_| invalid())?)),
        None => (value.trim(), None),
    };
    Ok((len.parse().map_err(|_| invalid())?, offset))
}

/// Attribute list entries, quoted values unquoted.
fn attributes(list: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = list;
    std::iter::from_fn(move || {
        let current = rest.trim_start_matches([',', ' ']);
        let (key, tail) = current.split_once('=')?;
        let (value, remaining) = match tail.strip_prefix('"') {
            Some(quoted) => quoted.split_once('"').unwrap_or((quoted, "")),
            None => tail.split_once(',').unwrap_or((tail, "")),
        };
        rest = remaining;
        Some((key.trim(), value))
    })
}

fn attribute<'a>(list: &'a str, key: &str) -> Option<&'a str> {
    attributes(list).find_map(|(k, v)| (k == key).then_some(v))
}

fn resolve(base: &Url, uri: &str) -> HlsResult<Url> {
    base.join(uri.trim())
        .map_err(|e| HlsError::InvalidUrl(format!("{uri}: {e}")))
}

fn key_info(base: &Url, key: &HlsDecryptionKey<'_>) -> HlsResult<KeyInfo> {
    match key.method {
        hls_m3u8::types::EncryptionMethod::Aes128 => {}
        ref other => return Err(HlsError::UnsupportedEncryption(other.to_string())),
    }
    let uri = key.uri().trim();
    if uri.is_empty() {
        return Err(HlsError::MissingKeyUri);
    }
    Ok(KeyInfo {
        uri: resolve(base, uri)?,
        iv: key.iv.to_slice(),
    })
}

/// Parses a media playlist. Relative URIs are resolved against `base`.
///
/// # Errors
///
/// - [`HlsError::VariantPlaylist`] for a master playlist.
/// - [`HlsError::IFramesOnly`] for an I-frame playlist.
/// - [`HlsError::UnsupportedEncryption`] for keys other than AES-128.
/// - [`HlsError::PlaylistParse`] for anything `hls_m3u8` rejects.
pub fn parse_media_playlist(data: &[u8], base: &Url) -> HlsResult<MediaPlaylist> {
    let input = std::str::from_utf8(data).map_err(|e| HlsError::PlaylistParse(e.to_string()))?;
    let tags = scan_tags(input)?;
    if tags.is_master {
        return Err(HlsError::VariantPlaylist(base.to_string()));
    }
    if tags.i_frames_only {
        return Err(HlsError::IFramesOnly);
    }

    let hls_media = HlsMediaPlaylist::try_from(input)
        .map_err(|e| HlsError::PlaylistParse(e.to_string()))?
        .into_owned();
    let media_sequence = hls_media.media_sequence as u64;
    let hls_segments: Vec<_> = hls_media.segments.values().collect();

    if tags.byte_ranges.len() != hls_segments.len() {
        return Err(HlsError::PlaylistParse(format!(
            "{} segment lines for {} segments",
            tags.byte_ranges.len(),
            hls_segments.len()
        )));
    }

    // Ranges without an offset continue where the previous range of the same
    // URI ended.
    let mut range_ends: HashMap<Url, u64> = HashMap::new();
    let mut segments = Vec::with_capacity(tags.byte_ranges.len());
    for ((index, seg), raw_range) in hls_segments
        .into_iter()
        .enumerate()
        .zip(tags.byte_ranges.iter().copied())
    {
        let uri = resolve(base, seg.uri())?;
        let byte_range = match raw_range {
            Some((len, offset)) => {
                let start = offset.unwrap_or_else(|| range_ends.get(&uri).copied().unwrap_or(0));
                range_ends.insert(uri.clone(), start + len);
                Some(
                    RangeSpec::with_len(start, len)
                        .map_err(|e| HlsError::PlaylistParse(e.to_string()))?,
                )
            }
            None => None,
        };
        let key = seg
            .keys()
            .first()
            .map(|k| key_info(base, k))
            .transpose()?;

        segments.push(MediaSegment {
            sequence: media_sequence + index as u64,
            uri,
            duration: seg.duration.duration(),
            byte_range,
            key,
        });
    }

    Ok(MediaPlaylist {
        segments,
        target_duration: hls_media.target_duration,
        media_sequence,
        end_list: tags.end_list,
        playlist_type: tags.playlist_type,
    })
}

/// Which attribute names a variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameKey {
    /// `NAME` of the video rendition.
    #[default]
    Name,
    /// Vertical resolution, e.g. `720p`.
    Pixels,
    /// Bandwidth, e.g. `1500k`.
    Bitrate,
}

/// One playable variant of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInfo {
    pub name: String,
    pub uri: Url,
    pub bandwidth: u64,
}

fn bitrate_name(bandwidth: u64) -> String {
    if bandwidth >= 1000 {
        format!("{}k", bandwidth / 1000)
    } else {
        format!("{}k", bandwidth as f64 / 1000.0)
    }
}

/// Lists the named variants of a master playlist.
///
/// The preferred attribute from `name_key` names a variant, falling back to
/// the rendition name, the resolution and the bandwidth in that order.
/// I-frame variants and duplicate names are skipped.
///
/// # Errors
///
/// [`HlsError::PlaylistParse`] if the playlist is not a valid master playlist.
pub fn parse_variant_playlist(
    data: &[u8],
    base: &Url,
    name_key: NameKey,
) -> HlsResult<Vec<VariantInfo>> {
    let input = std::str::from_utf8(data).map_err(|e| HlsError::PlaylistParse(e.to_string()))?;
    let tags = scan_tags(input)?;
    let hls_master = HlsMasterPlaylist::try_from(input)
        .map_err(|e| HlsError::PlaylistParse(e.to_string()))?
        .into_owned();

    let mut variants: Vec<VariantInfo> = Vec::new();
    let stream_infs = hls_master.variant_streams.iter().filter_map(|vs| match vs {
        HlsVariantStreamTag::ExtXStreamInf {
            uri, stream_data, ..
        } => Some((uri, stream_data)),
        HlsVariantStreamTag::ExtXIFrame { .. } => None,
    });

    for (position, (uri, stream_data)) in stream_infs.enumerate() {
        let bandwidth = stream_data.bandwidth() as u64;
        let name = tags
            .stream_video_groups
            .get(position)
            .and_then(Option::as_ref)
            .and_then(|group| tags.video_names.get(group))
            .cloned();
        let pixels = stream_data
            .resolution()
            .map(|resolution| format!("{}p", resolution.height()));
        let bitrate = (bandwidth > 0).then(|| bitrate_name(bandwidth));

        let preferred = match name_key {
            NameKey::Name => name.clone(),
            NameKey::Pixels => pixels.clone(),
            NameKey::Bitrate => bitrate.clone(),
        };
        let Some(stream_name) = preferred.or(name).or(pixels).or(bitrate) else {
            continue;
        };
        if variants.iter().any(|v| v.name == stream_name) {
            continue;
        }
        variants.push(VariantInfo {
            name: stream_name,
            uri: resolve(base, uri)?,
            bandwidth,
        });
    }
    Ok(variants)
}
