#![forbid(unsafe_code)]

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use rayon::{ThreadPoolBuilder, prelude::*};
use segflow_drm::{DecryptContext, plaintext_len};
use segflow_net::{Net, RangeSpec};
use tracing::debug;
use url::Url;

use crate::{HlsError, HlsResult, MediaSegment};

/// Parallel `HEAD` requests while building an index.
const HEAD_THREADS: usize = 16;

/// Byte placement of one segment in the concatenated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub sequence: u64,
    pub offset: u64,
    pub length: u64,
}

/// Cumulative byte offsets of a finished playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekIndex {
    entries: Vec<IndexEntry>,
    content_length: u64,
    duration: Duration,
    content_type: Option<String>,
}

impl SeekIndex {
    /// Index from known segment lengths, in playlist order.
    pub fn from_lengths(
        segments: &[MediaSegment],
        lengths: &[u64],
        content_type: Option<String>,
    ) -> Self {
        let mut offset = 0;
        let entries = segments
            .iter()
            .zip(lengths)
            .map(|(segment, &length)| {
                let entry = IndexEntry {
                    sequence: segment.sequence,
                    offset,
                    length,
                };
                offset += length;
                entry
            })
            .collect();
        Self {
            entries,
            content_length: offset,
            duration: segments.iter().map(|s| s.duration).sum(),
            content_type,
        }
    }

    /// Fetch segment lengths and build the index.
    ///
    /// Byte range segments take their length from the range. Encrypted
    /// segments are indexed by plaintext length, which needs the key and the
    /// last cipher blocks of each segment. Returns `None` if any length cannot
    /// be determined: a partial index would place seeks in the wrong segment.
    pub fn build(net: &dyn Net, segments: &[MediaSegment]) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        debug!(segments = segments.len(), "hls: fetching seek metadata");

        let pool = match ThreadPoolBuilder::new()
            .num_threads(HEAD_THREADS)
            .thread_name(|i| format!("segflow-hls-head-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                debug!(%err, "hls: unable to start metadata pool");
                return None;
            }
        };

        let keys = match fetch_keys(net, segments) {
            Ok(keys) => keys,
            Err(err) => {
                debug!(%err, "hls: unable to load keys for seek metadata");
                return None;
            }
        };

        let metas: HlsResult<Vec<(u64, Option<String>)>> = pool.install(|| {
            segments
                .par_iter()
                .map(|segment| segment_meta(net, &keys, segment))
                .collect()
        });
        let metas = match metas {
            Ok(metas) => metas,
            Err(err) => {
                debug!(%err, "hls: unable to get complete metadata for seek");
                return None;
            }
        };

        let lengths: Vec<u64> = metas.iter().map(|(length, _)| *length).collect();
        let content_type = metas.into_iter().rev().find_map(|(_, ct)| ct);
        let index = Self::from_lengths(segments, &lengths, content_type);
        debug!(
            content_length = index.content_length,
            duration = ?index.duration,
            content_type = ?index.content_type,
            "hls: seek metadata complete"
        );
        Some(index)
    }

    /// Entry containing byte `position` and the bytes of it before `position`.
    pub fn locate(&self, position: u64) -> Option<(IndexEntry, u64)> {
        let idx = self
            .entries
            .partition_point(|e| e.offset + e.length <= position);
        let entry = *self.entries.get(idx)?;
        (entry.offset <= position).then(|| (entry, position - entry.offset))
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

fn fetch_keys(net: &dyn Net, segments: &[MediaSegment]) -> HlsResult<HashMap<Url, Bytes>> {
    let mut keys = HashMap::new();
    for key in segments.iter().filter_map(|s| s.key.as_ref()) {
        if !keys.contains_key(&key.uri) {
            let material = net.get_bytes(key.uri.clone(), None)?;
            keys.insert(key.uri.clone(), material);
        }
    }
    Ok(keys)
}

fn segment_meta(
    net: &dyn Net,
    keys: &HashMap<Url, Bytes>,
    segment: &MediaSegment,
) -> HlsResult<(u64, Option<String>)> {
    let bounded = segment
        .byte_range
        .and_then(|range| range.len().map(|len| (range.start, len)));
    let (start, length, content_type) = match bounded {
        Some((start, len)) => (start, len, None),
        None => {
            let headers = net.head(segment.uri.clone(), None)?;
            let length = headers
                .content_length()
                .ok_or_else(|| HlsError::MissingLength(segment.uri.to_string()))?;
            (0, length, headers.content_type().map(str::to_owned))
        }
    };
    let Some(key) = &segment.key else {
        return Ok((length, content_type));
    };
    let material = keys.get(&key.uri).ok_or(HlsError::MissingKeyUri)?;
    let ctx = DecryptContext::for_segment(material, key.iv, segment.sequence)?;
    Ok((plaintext_length(net, segment, ctx, start, length)?, content_type))
}

/// Decrypt the final cipher block to learn how much padding it carries.
fn plaintext_length(
    net: &dyn Net,
    segment: &MediaSegment,
    mut ctx: DecryptContext,
    start: u64,
    cipher_len: u64,
) -> HlsResult<u64> {
    let aligned = cipher_len - cipher_len % 16;
    if aligned == 0 {
        return Ok(0);
    }
    // The previous cipher block is the IV of the last one.
    let tail_start = aligned.saturating_sub(32);
    let tail_len = aligned - tail_start;
    let range = RangeSpec::with_len(start + tail_start, tail_len)?;
    let tail = net
        .get_range(segment.uri.clone(), range, None)?
        .collect_bytes()?;
    if tail.len() as u64 != tail_len {
        return Err(HlsError::MissingLength(segment.uri.to_string()));
    }
    let last_block = if tail_len == 32 {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&tail[..16]);
        ctx.iv = iv;
        &tail[16..]
    } else {
        &tail[..]
    };
    Ok(plaintext_len(ctx, cipher_len, last_block)?)
}
