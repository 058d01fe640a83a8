#![forbid(unsafe_code)]

use std::sync::Arc;

use segflow_http::{HttpStream, SegmentedHttpStream, probe};
use segflow_net::Net;
use segflow_stream::StreamOptions;
use tracing::debug;
use url::Url;

use crate::MediaStream;

/// Picks the HTTP stream flavor for a URL.
///
/// With more than one segment thread and a length reported by `HEAD`, the
/// resource is fetched as parallel byte ranges. Otherwise it is streamed as
/// one progressive body.
pub struct HttpSelect;

impl HttpSelect {
    pub fn select(url: Url, net: Arc<dyn Net>, options: StreamOptions) -> MediaStream {
        let probe = match probe(net.as_ref(), &url) {
            Ok(probe) => Some(probe),
            Err(err) => {
                debug!(url = %url, %err, "http select: probe failed");
                None
            }
        };
        let length = probe.as_ref().and_then(|p| p.content_length);

        match probe {
            Some(probe) if options.segment_threads > 1 && length.is_some() => {
                debug!(url = %url, ?length, "http select: segmented");
                MediaStream::SegmentedHttp(
                    SegmentedHttpStream::new(url, net, options).with_probe(probe),
                )
            }
            Some(probe) => {
                debug!(url = %url, "http select: progressive");
                MediaStream::Http(HttpStream::new(url, net, options).with_probe(probe))
            }
            None => MediaStream::Http(HttpStream::new(url, net, options)),
        }
    }
}
