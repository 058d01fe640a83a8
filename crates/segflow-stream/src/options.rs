#![forbid(unsafe_code)]

use std::time::Duration;

use segflow_buffer::{DEFAULT_CAPACITY, ReorderPolicy};
use segflow_net::NetOptions;

/// Configuration shared by every component of one stream.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Capacity of the stream buffer in bytes.
    pub ringbuffer_size: usize,
    /// Fetch attempts per segment before it is dropped (live) or fails the stream.
    pub segment_attempts: u32,
    /// Whole-request bound for one segment fetch attempt.
    pub segment_timeout: Duration,
    /// Fetch pool size, also the number of segments each writer keeps in flight.
    pub segment_threads: usize,
    /// Writers pulling from the segment queue. More than one switches the
    /// stream buffer to the reordering variant.
    pub writer_threads: usize,
    pub segment_queue_size: usize,
    /// How long a read may wait for data before failing with `ReadTimeout`.
    pub read_timeout: Duration,
    /// Segments from the end of a live playlist where playback starts.
    pub hls_live_edge: usize,
    /// Slice size of the HTTP byte-range stream.
    pub http_segment_size: u64,
    pub fetch_chunk_size: usize,
    pub seek_timeout: Duration,
    pub reorder: ReorderPolicy,
    pub net: NetOptions,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            ringbuffer_size: DEFAULT_CAPACITY,
            segment_attempts: 3,
            segment_timeout: Duration::from_secs(10),
            segment_threads: 3,
            writer_threads: 1,
            segment_queue_size: 20,
            read_timeout: Duration::from_secs(60),
            hls_live_edge: 3,
            http_segment_size: 2 * 1024 * 1024,
            fetch_chunk_size: 8 * 1024,
            seek_timeout: Duration::from_secs(60),
            reorder: ReorderPolicy::default(),
            net: NetOptions::default(),
        }
    }
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ringbuffer_size(mut self, size: usize) -> Self {
        self.ringbuffer_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_segment_attempts(mut self, attempts: u32) -> Self {
        self.segment_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_segment_threads(mut self, threads: usize) -> Self {
        self.segment_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn with_segment_queue_size(mut self, size: usize) -> Self {
        self.segment_queue_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hls_live_edge(mut self, segments: usize) -> Self {
        self.hls_live_edge = segments;
        self
    }

    #[must_use]
    pub fn with_http_segment_size(mut self, size: u64) -> Self {
        self.http_segment_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_fetch_chunk_size(mut self, size: usize) -> Self {
        self.fetch_chunk_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reorder_policy(mut self, policy: ReorderPolicy) -> Self {
        self.reorder = policy;
        self
    }

    #[must_use]
    pub fn with_net(mut self, net: NetOptions) -> Self {
        self.net = net;
        self
    }

    /// Network options for segment fetches: each attempt is bounded by
    /// `segment_timeout` and bodies are read in `fetch_chunk_size` pieces.
    pub fn segment_net_options(&self) -> NetOptions {
        let mut net = self.net.clone();
        net.stream_timeout = Some(self.segment_timeout);
        net.chunk_size = self.fetch_chunk_size;
        net
    }

    /// Segments each writer keeps in flight.
    pub(crate) fn lookahead(&self) -> usize {
        (self.segment_threads / self.writer_threads.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults() {
        let options = StreamOptions::default();
        assert_eq!(options.ringbuffer_size, 16 * 1024 * 1024);
        assert_eq!(options.segment_attempts, 3);
        assert_eq!(options.segment_timeout, Duration::from_secs(10));
        assert_eq!(options.segment_threads, 3);
        assert_eq!(options.writer_threads, 1);
        assert_eq!(options.hls_live_edge, 3);
        assert_eq!(options.read_timeout, Duration::from_secs(60));
    }

    #[rstest]
    #[case::single_writer(3, 1, 3)]
    #[case::split(4, 2, 2)]
    #[case::more_writers_than_threads(1, 4, 1)]
    fn lookahead_splits_pool_between_writers(
        #[case] threads: usize,
        #[case] writers: usize,
        #[case] expected: usize,
    ) {
        let options = StreamOptions::new()
            .with_segment_threads(threads)
            .with_writer_threads(writers);
        assert_eq!(options.lookahead(), expected);
    }

    #[rstest]
    fn segment_net_options_bound_each_attempt() {
        let options = StreamOptions::new()
            .with_segment_timeout(Duration::from_secs(4))
            .with_fetch_chunk_size(1024);
        let net = options.segment_net_options();
        assert_eq!(net.stream_timeout, Some(Duration::from_secs(4)));
        assert_eq!(net.chunk_size, 1024);
    }
}
