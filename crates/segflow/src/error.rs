#![forbid(unsafe_code)]

use segflow_hls::HlsError;
use segflow_net::NetError;
use segflow_stream::StreamError;
use thiserror::Error;

/// Errors of the facade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("HLS error: {0}")]
    Hls(#[from] HlsError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Error while executing subprocess: {0}")]
    Process(String),
}

pub type MediaResult<T> = Result<T, MediaError>;
