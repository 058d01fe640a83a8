#![forbid(unsafe_code)]

use std::{fmt, sync::Arc};

use segflow_net::Net;
use segflow_stream::{SegmentedStream, StreamOptions, StreamReader, StreamResult};
use tracing::debug;
use url::Url;

use crate::{HttpError, HttpProbe, ProgressiveSource, RangeSlicer, probe};

/// Plain HTTP stream: one request, no seeking.
#[derive(Clone)]
pub struct HttpStream {
    url: Url,
    net: Arc<dyn Net>,
    options: StreamOptions,
    probe: Option<HttpProbe>,
}

impl HttpStream {
    pub fn new(url: Url, net: Arc<dyn Net>, options: StreamOptions) -> Self {
        Self {
            url,
            net,
            options,
            probe: None,
        }
    }

    /// Reuse an earlier `HEAD` result for stream metadata.
    #[must_use]
    pub fn with_probe(mut self, probe: HttpProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// # Errors
    ///
    /// Errors from [`SegmentedStream::open`].
    pub fn open(&self) -> StreamResult<StreamReader> {
        let probe = self.probe.clone().unwrap_or_default();
        let source = ProgressiveSource::new(self.url.clone())
            .with_content_length(probe.content_length)
            .with_content_type(probe.content_type);
        debug!(url = %self.url, "http: opening progressive stream");
        SegmentedStream::new(source, Arc::clone(&self.net), self.options.clone()).open()
    }
}

/// HTTP stream fetched as parallel byte ranges. Seekable.
#[derive(Clone)]
pub struct SegmentedHttpStream {
    url: Url,
    net: Arc<dyn Net>,
    options: StreamOptions,
    probe: Option<HttpProbe>,
}

impl SegmentedHttpStream {
    pub fn new(url: Url, net: Arc<dyn Net>, options: StreamOptions) -> Self {
        Self {
            url,
            net,
            options,
            probe: None,
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: HttpProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Probe the length if not known yet, then start streaming.
    ///
    /// # Errors
    ///
    /// - [`HttpError::UnknownLength`] (as a source error) if the server does
    ///   not report a content length.
    /// - Errors from [`SegmentedStream::open`].
    pub fn open(&self) -> StreamResult<StreamReader> {
        let probe = match &self.probe {
            Some(probe) if probe.content_length.is_some() => probe.clone(),
            _ => probe(self.net.as_ref(), &self.url)?,
        };
        let length = probe
            .content_length
            .ok_or_else(|| HttpError::UnknownLength(self.url.to_string()))?;

        let slicer = RangeSlicer::new(self.url.clone(), length, self.options.http_segment_size)?
            .with_content_type(probe.content_type);
        debug!(
            url = %self.url,
            length,
            segments = slicer.segment_count(),
            "http: opening segmented stream"
        );
        SegmentedStream::new(slicer, Arc::clone(&self.net), self.options.clone()).open()
    }
}

impl fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream").field("url", &self.url.as_str()).finish()
    }
}

impl fmt::Debug for SegmentedHttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedHttpStream")
            .field("url", &self.url.as_str())
            .field("probe", &self.probe)
            .finish()
    }
}
