use std::{
    fmt,
    io::{self, Read},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    retry::{DefaultRetryPolicy, RetryNet},
    types::{Headers, RangeSpec, RetryPolicy},
};

const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Blocking response body, read in chunks.
pub struct ByteStream {
    reader: Box<dyn Read + Send>,
    content_length: Option<u64>,
    chunk_size: usize,
    done: bool,
}

impl ByteStream {
    pub fn new<R: Read + Send + 'static>(reader: R, content_length: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            content_length,
            chunk_size: DEFAULT_CHUNK_SIZE,
            done: false,
        }
    }

    /// In-memory body.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self::new(io::Cursor::new(bytes), Some(len))
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Length advertised by the server, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next chunk of at most `chunk_size` bytes, `None` at end of body.
    ///
    /// # Errors
    ///
    /// [`NetError::Timeout`] or [`NetError::Body`] if reading fails.
    pub fn read_chunk(&mut self) -> NetResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = BytesMut::zeroed(self.chunk_size);
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return Ok(None);
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf.freeze()));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Err(NetError::from(e));
                }
            }
        }
    }

    /// Read the remaining body into memory.
    ///
    /// # Errors
    ///
    /// Same as [`read_chunk`](Self::read_chunk).
    pub fn collect_bytes(mut self) -> NetResult<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl Iterator for ByteStream {
    type Item = NetResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_chunk().transpose()
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("content_length", &self.content_length)
            .field("chunk_size", &self.chunk_size)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg_attr(test, unimock(api = NetMock))]
pub trait Net: Send + Sync {
    /// Get all bytes from a URL
    fn get_bytes(&self, url: Url, headers: Option<Headers>) -> NetResult<Bytes>;

    /// Stream bytes from a URL
    fn stream(&self, url: Url, headers: Option<Headers>) -> NetResult<ByteStream>;

    /// Get a range of bytes from a URL
    fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<ByteStream>;

    /// Response headers of a HEAD request
    fn head(&self, url: Url, headers: Option<Headers>) -> NetResult<Headers>;
}

impl<N: Net + ?Sized> Net for Arc<N> {
    fn get_bytes(&self, url: Url, headers: Option<Headers>) -> NetResult<Bytes> {
        (**self).get_bytes(url, headers)
    }

    fn stream(&self, url: Url, headers: Option<Headers>) -> NetResult<ByteStream> {
        (**self).stream(url, headers)
    }

    fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<ByteStream> {
        (**self).get_range(url, range, headers)
    }

    fn head(&self, url: Url, headers: Option<Headers>) -> NetResult<Headers> {
        (**self).head(url, headers)
    }
}

pub trait NetExt: Net + Sized {
    /// Add retry layer
    fn with_retry(self, policy: RetryPolicy) -> RetryNet<Self, DefaultRetryPolicy> {
        RetryNet::new(self, DefaultRetryPolicy::new(policy))
    }
}

impl<T: Net> NetExt for T {}
