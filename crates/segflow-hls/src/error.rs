#![forbid(unsafe_code)]

use segflow_drm::DrmError;
use segflow_net::NetError;
use segflow_stream::StreamError;
use thiserror::Error;

/// HLS errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HlsError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Playlist parsing error: {0}")]
    PlaylistParse(String),

    #[error("Attempted to play a variant playlist, list its variants instead: {0}")]
    VariantPlaylist(String),

    #[error("Streams containing I-frames only are not playable")]
    IFramesOnly,

    #[error("Unable to decrypt cipher {0}")]
    UnsupportedEncryption(String),

    #[error("Missing URI to decryption key")]
    MissingKeyUri,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No content length for segment {0}")]
    MissingLength(String),

    #[error("Key error: {0}")]
    Drm(#[from] DrmError),
}

impl From<HlsError> for StreamError {
    fn from(err: HlsError) -> Self {
        match err {
            HlsError::Net(err) => StreamError::Net(err),
            other => StreamError::source_error(other),
        }
    }
}

pub type HlsResult<T> = Result<T, HlsError>;
