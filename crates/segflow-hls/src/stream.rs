#![forbid(unsafe_code)]

use std::{fmt, sync::Arc};

use segflow_net::Net;
use segflow_stream::{SegmentedStream, StreamOptions, StreamReader, StreamResult};
use tracing::debug;
use url::Url;

use crate::{HlsResult, HlsSource, NameKey, parse_variant_playlist};

/// HLS media playlist stream.
#[derive(Clone)]
pub struct HlsStream {
    url: Url,
    net: Arc<dyn Net>,
    options: StreamOptions,
}

/// Named entry of a master playlist.
#[derive(Clone, Debug)]
pub struct HlsVariant {
    pub name: String,
    pub bandwidth: u64,
    pub stream: HlsStream,
}

impl HlsStream {
    pub fn new(url: Url, net: Arc<dyn Net>, options: StreamOptions) -> Self {
        Self { url, net, options }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Load the playlist and start streaming.
    ///
    /// Finished `VOD`/`EVENT` playlists are seekable once every segment
    /// length is known.
    ///
    /// # Errors
    ///
    /// - Playlist errors of the first load, as [`crate::HlsError`] source errors.
    /// - Errors from [`SegmentedStream::open`].
    pub fn open(&self) -> StreamResult<StreamReader> {
        let source = HlsSource::open(
            self.url.clone(),
            Arc::clone(&self.net),
            self.options.hls_live_edge,
        )?;
        debug!(
            url = %self.url,
            seekable = source.index().is_some(),
            "hls: opening stream"
        );
        SegmentedStream::new(source, Arc::clone(&self.net), self.options.clone()).open()
    }

    /// Fetch a master playlist and list its variants as streams.
    ///
    /// # Errors
    ///
    /// Network errors and [`crate::HlsError::PlaylistParse`].
    pub fn parse_variant_playlist(
        url: &Url,
        net: Arc<dyn Net>,
        options: StreamOptions,
        name_key: NameKey,
    ) -> HlsResult<Vec<HlsVariant>> {
        let data = net.get_bytes(url.clone(), None)?;
        let variants = parse_variant_playlist(&data, url, name_key)?;
        debug!(url = %url, variants = variants.len(), "hls: variant playlist parsed");
        Ok(variants
            .into_iter()
            .map(|variant| HlsVariant {
                name: variant.name,
                bandwidth: variant.bandwidth,
                stream: HlsStream::new(variant.uri, Arc::clone(&net), options.clone()),
            })
            .collect())
    }
}

impl fmt::Debug for HlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HlsStream").field("url", &self.url.as_str()).finish()
    }
}
