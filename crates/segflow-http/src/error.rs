#![forbid(unsafe_code)]

use segflow_net::NetError;
use segflow_stream::StreamError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Unable to probe {url}: {source}")]
    Probe {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Content length of {0} is unknown")]
    UnknownLength(String),

    #[error("Empty resource: {0}")]
    Empty(String),
}

impl From<HttpError> for StreamError {
    fn from(err: HttpError) -> Self {
        StreamError::source_error(err)
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
