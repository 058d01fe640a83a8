#![forbid(unsafe_code)]

use segflow_net::RangeSpec;
use segflow_stream::{
    Segment, SegmentSource, SourceInfo, SourceStep, StreamError, StreamResult,
};
use tracing::trace;
use url::Url;

use crate::{HttpError, HttpResult};

/// Fixed-size byte-range segments covering `[0, content_length)`.
#[derive(Clone, Debug)]
pub struct RangeSlicer {
    url: Url,
    content_length: u64,
    segment_size: u64,
    next: u64,
    content_type: Option<String>,
}

impl RangeSlicer {
    /// # Errors
    ///
    /// [`HttpError::Empty`] for a zero-length resource.
    pub fn new(url: Url, content_length: u64, segment_size: u64) -> HttpResult<Self> {
        if content_length == 0 {
            return Err(HttpError::Empty(url.to_string()));
        }
        Ok(Self {
            url,
            content_length,
            segment_size: segment_size.max(1),
            next: 0,
            content_type: None,
        })
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn segment_count(&self) -> u64 {
        self.content_length.div_ceil(self.segment_size)
    }

    fn segment(&self, index: u64) -> StreamResult<Segment> {
        let start = index * self.segment_size;
        let len = self.segment_size.min(self.content_length - start);
        let range = RangeSpec::with_len(start, len)?;
        Ok(Segment::new(self.url.clone(), index)
            .with_range(range)
            .last(index + 1 == self.segment_count()))
    }
}

impl SegmentSource for RangeSlicer {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        if self.next >= self.segment_count() {
            return Ok(SourceStep::End);
        }
        let segment = self.segment(self.next)?;
        trace!(index = self.next, range = ?segment.range, "slicer: next range");
        self.next += 1;
        Ok(SourceStep::Segment(segment))
    }

    fn seek(&mut self, position: u64) -> StreamResult<u64> {
        if position >= self.content_length {
            return Err(StreamError::InvalidSeek {
                position,
                length: Some(self.content_length),
            });
        }
        self.next = position / self.segment_size;
        Ok(position % self.segment_size)
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            supports_seek: true,
            content_length: Some(self.content_length),
            duration: None,
            content_type: self.content_type.clone(),
            is_live: false,
        }
    }
}
