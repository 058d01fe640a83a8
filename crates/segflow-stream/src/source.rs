#![forbid(unsafe_code)]

use std::time::Duration;

use crate::{Segment, StreamError, StreamResult};

/// What a source produced on one poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceStep {
    Segment(Segment),
    /// Nothing new yet, poll again after the delay (live playlists).
    Wait(Duration),
    /// No further segments.
    End,
}

/// Static description of a source, captured when the stream opens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub supports_seek: bool,
    pub content_length: Option<u64>,
    pub duration: Option<Duration>,
    pub content_type: Option<String>,
    /// Live sources drop segments that cannot be fetched instead of failing.
    pub is_live: bool,
}

/// Protocol-specific producer of segments, driven by the stream worker.
pub trait SegmentSource: Send + 'static {
    /// Produce the next step. Errors are fatal to the stream.
    fn next_step(&mut self) -> StreamResult<SourceStep>;

    /// Reposition so the next segment contains byte `position`.
    ///
    /// Returns how many bytes of that segment precede `position`.
    fn seek(&mut self, position: u64) -> StreamResult<u64> {
        let _ = position;
        Err(StreamError::SeekNotSupported)
    }

    fn info(&self) -> SourceInfo;
}

impl<S: SegmentSource + ?Sized> SegmentSource for Box<S> {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        (**self).next_step()
    }

    fn seek(&mut self, position: u64) -> StreamResult<u64> {
        (**self).seek(position)
    }

    fn info(&self) -> SourceInfo {
        (**self).info()
    }
}
