use bytes::Bytes;
use reqwest::blocking::{Client, RequestBuilder, Response};
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, NetOptions, RangeSpec},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// [`NetError::Setup`] if the TLS backend or resolver cannot be initialized.
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let mut builder = Client::builder()
            .timeout(None::<std::time::Duration>)
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host);
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let inner = builder
            .build()
            .map_err(|e| NetError::Setup(e.to_string()))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(&self, mut req: RequestBuilder, headers: Option<Headers>) -> RequestBuilder {
        for (k, v) in self.options.headers.merged(headers.as_ref()).iter() {
            req = req.header(k, v);
        }
        req
    }

    fn check_status(url: &Url, resp: Response, partial_ok: bool) -> NetResult<Response> {
        let status = resp.status();
        if status.is_success() || (partial_ok && status.as_u16() == 206) {
            return Ok(resp);
        }
        Err(NetError::http_status(status.as_u16(), url.to_string()))
    }

    fn into_stream(&self, resp: Response) -> ByteStream {
        let content_length = resp.content_length();
        ByteStream::new(resp, content_length).with_chunk_size(self.options.chunk_size)
    }
}

impl Net for HttpClient {
    fn get_bytes(&self, url: Url, headers: Option<Headers>) -> NetResult<Bytes> {
        let req = self
            .apply_headers(self.inner.get(url.clone()), headers)
            .timeout(self.options.request_timeout);

        let resp = Self::check_status(&url, req.send()?, false)?;
        let bytes = resp.bytes()?;
        trace!(%url, len = bytes.len(), "net: get_bytes");
        Ok(bytes)
    }

    fn stream(&self, url: Url, headers: Option<Headers>) -> NetResult<ByteStream> {
        let mut req = self.apply_headers(self.inner.get(url.clone()), headers);
        if let Some(timeout) = self.options.stream_timeout {
            req = req.timeout(timeout);
        }

        let resp = Self::check_status(&url, req.send()?, false)?;
        trace!(%url, len = ?resp.content_length(), "net: stream opened");
        Ok(self.into_stream(resp))
    }

    fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> NetResult<ByteStream> {
        if range.end.is_some_and(|end| end < range.start) {
            return Err(NetError::InvalidRange(range.to_header_value()));
        }
        let mut req = self
            .apply_headers(self.inner.get(url.clone()), headers)
            .header("Range", range.to_header_value());
        if let Some(timeout) = self.options.stream_timeout {
            req = req.timeout(timeout);
        }

        let resp = Self::check_status(&url, req.send()?, true)?;
        trace!(%url, range = %range.to_header_value(), status = resp.status().as_u16(), "net: range opened");
        Ok(self.into_stream(resp))
    }

    fn head(&self, url: Url, headers: Option<Headers>) -> NetResult<Headers> {
        let req = self
            .apply_headers(self.inner.head(url.clone()), headers)
            .timeout(self.options.request_timeout);

        let resp = Self::check_status(&url, req.send()?, false)?;

        let mut out = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str(), v);
            }
        }
        Ok(out)
    }
}
