#![forbid(unsafe_code)]

use segflow_net::Net;
use tracing::debug;
use url::Url;

use crate::{HttpError, HttpResult};

/// What a `HEAD` request tells about a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpProbe {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub accepts_ranges: bool,
}

/// Issue a `HEAD` request for `url`. A zero length is reported as unknown.
///
/// # Errors
///
/// [`HttpError::Probe`] if the request fails.
pub fn probe(net: &dyn Net, url: &Url) -> HttpResult<HttpProbe> {
    let headers = net
        .head(url.clone(), None)
        .map_err(|source| HttpError::Probe {
            url: url.to_string(),
            source,
        })?;
    let probe = HttpProbe {
        // Bodiless HEAD responses often carry a zero length.
        content_length: headers.content_length().filter(|&len| len > 0),
        content_type: headers.content_type().map(str::to_owned),
        accepts_ranges: headers
            .get("accept-ranges")
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
    };
    debug!(%url, ?probe, "http: probed");
    Ok(probe)
}
