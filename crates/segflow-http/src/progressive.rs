#![forbid(unsafe_code)]

use segflow_stream::{Segment, SegmentSource, SourceInfo, SourceStep, StreamResult};
use url::Url;

/// The whole resource as a single streamed segment.
#[derive(Clone, Debug)]
pub struct ProgressiveSource {
    url: Url,
    content_length: Option<u64>,
    content_type: Option<String>,
    done: bool,
}

impl ProgressiveSource {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            content_length: None,
            content_type: None,
            done: false,
        }
    }

    #[must_use]
    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

impl SegmentSource for ProgressiveSource {
    fn next_step(&mut self) -> StreamResult<SourceStep> {
        if self.done {
            return Ok(SourceStep::End);
        }
        self.done = true;
        Ok(SourceStep::Segment(
            Segment::new(self.url.clone(), 0).last(true),
        ))
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            supports_seek: false,
            content_length: self.content_length,
            duration: None,
            content_type: self.content_type.clone(),
            is_live: false,
        }
    }
}
