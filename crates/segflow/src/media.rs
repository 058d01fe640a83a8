#![forbid(unsafe_code)]

use std::sync::Arc;

use segflow_hls::HlsStream;
use segflow_http::{HttpStream, SegmentedHttpStream};
use segflow_net::{HttpClient, Net, NetExt};
use segflow_stream::StreamOptions;
use tracing::debug;

use crate::{HttpSelect, MediaReader, MediaResult, ProcessStream, SourceType};

/// Every stream kind segflow can open.
#[derive(Clone, Debug)]
pub enum MediaStream {
    /// One progressive HTTP body.
    Http(HttpStream),
    /// Parallel HTTP byte ranges.
    SegmentedHttp(SegmentedHttpStream),
    Hls(HlsStream),
    /// Stdout of a child process.
    Process(ProcessStream),
}

impl MediaStream {
    /// Stream for a URL, by [`SourceType::detect`]. HTTP URLs go through
    /// [`HttpSelect`], which issues a `HEAD` request.
    ///
    /// # Errors
    ///
    /// [`MediaError::InvalidUrl`](crate::MediaError::InvalidUrl).
    pub fn from_url(url: &str, net: Arc<dyn Net>, options: StreamOptions) -> MediaResult<Self> {
        let stream = match SourceType::detect(url)? {
            SourceType::Hls(url) => Self::Hls(HlsStream::new(url, net, options)),
            SourceType::Http(url) => HttpSelect::select(url, net, options),
        };
        debug!(kind = stream.kind(), "media: stream resolved");
        Ok(stream)
    }

    /// Short name of the stream kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::SegmentedHttp(_) => "segmented_http",
            Self::Hls(_) => "hls",
            Self::Process(_) => "process",
        }
    }

    /// Start streaming.
    ///
    /// # Errors
    ///
    /// Whatever the underlying stream reports while opening.
    pub fn open(&self) -> MediaResult<MediaReader> {
        Ok(match self {
            Self::Http(stream) => stream.open()?.into(),
            Self::SegmentedHttp(stream) => stream.open()?.into(),
            Self::Hls(stream) => stream.open()?.into(),
            Self::Process(stream) => stream.open()?.into(),
        })
    }
}

/// Blocking HTTP client with the retry layer, configured from `options.net`.
/// Streamed bodies are bounded by `options.segment_timeout`.
///
/// # Errors
///
/// [`MediaError::Net`](crate::MediaError::Net) if the client cannot be built.
pub fn default_net(options: &StreamOptions) -> MediaResult<Arc<dyn Net>> {
    let client = HttpClient::new(options.segment_net_options())?;
    Ok(Arc::new(client.with_retry(options.net.retry_policy.clone())))
}
