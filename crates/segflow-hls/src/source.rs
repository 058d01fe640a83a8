#![forbid(unsafe_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use segflow_net::Net;
use segflow_stream::{
    Segment, SegmentKey, SegmentSource, SourceInfo, SourceStep, StreamError, StreamResult,
};
use tracing::{debug, trace, warn};
use url::Url;

use crate::{HlsResult, MediaPlaylist, MediaSegment, SeekIndex, parse_media_playlist};

const MIN_RELOAD_DELAY: Duration = Duration::from_secs(1);

/// Walks an HLS media playlist, reloading it while the stream is live.
pub struct HlsSource {
    url: Url,
    net: Arc<dyn Net>,
    live_edge: usize,
    segments: Vec<MediaSegment>,
    index: Option<SeekIndex>,
    /// Next sequence to hand out. Unset until the first non-empty playlist.
    next_sequence: Option<u64>,
    /// Last sequence of a playlist that carried `#EXT-X-ENDLIST`.
    playlist_end: Option<u64>,
    reload_delay: Duration,
    reloaded_at: Instant,
}

impl HlsSource {
    /// Fetch the playlist and pick the starting segment.
    ///
    /// `live_edge` is how many segments from the end a live playlist starts.
    ///
    /// # Errors
    ///
    /// Network and parse errors of the first playlist load.
    pub fn open(url: Url, net: Arc<dyn Net>, live_edge: usize) -> HlsResult<Self> {
        let mut source = Self {
            url,
            net,
            live_edge,
            segments: Vec::new(),
            index: None,
            next_sequence: None,
            playlist_end: None,
            reload_delay: MIN_RELOAD_DELAY,
            reloaded_at: Instant::now(),
        };
        source.reload()?;
        Ok(source)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn index(&self) -> Option<&SeekIndex> {
        self.index.as_ref()
    }

    /// Delay before the next playlist reload.
    pub fn reload_delay(&self) -> Duration {
        self.reload_delay
    }

    pub fn next_sequence(&self) -> Option<u64> {
        self.next_sequence
    }

    fn reload(&mut self) -> HlsResult<()> {
        debug!(url = %self.url, "hls: reloading playlist");
        self.reloaded_at = Instant::now();
        let data = self.net.get_bytes(self.url.clone(), None)?;
        let playlist = parse_media_playlist(&data, &self.url)?;
        if !playlist.segments.is_empty() {
            self.process(playlist);
        }
        Ok(())
    }

    fn process(&mut self, playlist: MediaPlaylist) {
        let changed = !playlist
            .sequences()
            .eq(self.segments.iter().map(|s| s.sequence));

        let target = if playlist.target_duration.is_zero() {
            playlist
                .segments
                .last()
                .map(|s| s.duration)
                .unwrap_or_default()
        } else {
            playlist.target_duration
        };
        self.reload_delay = if changed { target } else { target / 2 }.max(MIN_RELOAD_DELAY);

        if playlist.end_list {
            self.playlist_end = playlist.last_sequence();
            if changed && playlist.is_complete() {
                self.index = SeekIndex::build(self.net.as_ref(), &playlist.segments);
            }
        }

        if self.next_sequence.is_none() {
            let start = if self.playlist_end.is_none() {
                let edge = self.live_edge.max(1).min(playlist.segments.len());
                playlist.segments.len() - edge
            } else {
                0
            };
            self.next_sequence = playlist.segments.get(start).map(|s| s.sequence);
            debug!(
                sequence = ?self.next_sequence,
                live = self.playlist_end.is_none(),
                "hls: starting sequence"
            );
        }

        if changed {
            self.segments = playlist.segments;
        }
        trace!(delay = ?self.reload_delay, changed, "hls: playlist processed");
    }

    fn finished(&self) -> bool {
        match (self.playlist_end, self.next_sequence) {
            (Some(end), Some(next)) => next > end,
            _ => false,
        }
    }

    fn next_segment(&mut self) -> Option<Segment> {
        let next = self.next_sequence?;
        let entry = self.segments.iter().find(|s| s.sequence >= next)?;
        let is_last = self.playlist_end.is_some_and(|end| entry.sequence >= end);

        let mut segment = Segment::new(entry.uri.clone(), entry.sequence).last(is_last);
        if let Some(range) = entry.byte_range {
            segment = segment.with_range(range);
        }
        if let Some(key) = &entry.key {
            segment = segment.with_key(SegmentKey::new(key.uri.clone(), key.iv));
        }
        self.next_sequence = Some(entry.sequence + 1);
        Some(segment)
    }
}

impl SegmentSource for HlsSource {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        loop {
            if let Some(segment) = self.next_segment() {
                return Ok(SourceStep::Segment(segment));
            }
            if self.finished() {
                return Ok(SourceStep::End);
            }

            let elapsed = self.reloaded_at.elapsed();
            if elapsed < self.reload_delay {
                return Ok(SourceStep::Wait(self.reload_delay - elapsed));
            }
            if let Err(err) = self.reload() {
                warn!(url = %self.url, %err, "hls: failed to reload playlist");
                return Ok(SourceStep::Wait(self.reload_delay));
            }
        }
    }

    fn seek(&mut self, position: u64) -> StreamResult<u64> {
        let index = self.index.as_ref().ok_or(StreamError::SeekNotSupported)?;
        let (entry, skip) = index.locate(position).ok_or(StreamError::InvalidSeek {
            position,
            length: Some(index.content_length()),
        })?;
        debug!(position, sequence = entry.sequence, skip, "hls: seek");
        self.next_sequence = Some(entry.sequence);
        Ok(skip)
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            supports_seek: self.index.is_some(),
            content_length: self.index.as_ref().map(SeekIndex::content_length),
            duration: self.index.as_ref().map(SeekIndex::duration),
            content_type: self
                .index
                .as_ref()
                .and_then(|i| i.content_type().map(str::to_owned)),
            is_live: self.playlist_end.is_none(),
        }
    }
}
