#![forbid(unsafe_code)]

use segflow_net::RangeSpec;
use url::Url;

/// Key reference of an encrypted segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentKey {
    pub uri: Url,
    /// Explicit IV. Without one the sequence number is used.
    pub iv: Option<[u8; 16]>,
}

impl SegmentKey {
    pub fn new(uri: Url, iv: Option<[u8; 16]>) -> Self {
        Self { uri, iv }
    }
}

/// One fetchable unit of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub url: Url,
    pub range: Option<RangeSpec>,
    pub key: Option<SegmentKey>,
    pub sequence: u64,
    /// Work group the segment was produced under. Set by the worker.
    pub group: u64,
    pub is_last: bool,
}

impl Segment {
    pub fn new(url: Url, sequence: u64) -> Self {
        Self {
            url,
            range: None,
            key: None,
            sequence,
            group: 0,
            is_last: false,
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: SegmentKey) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub fn last(mut self, is_last: bool) -> Self {
        self.is_last = is_last;
        self
    }

    #[must_use]
    pub(crate) fn in_group(mut self, group: u64) -> Self {
        self.group = group;
        self
    }
}
