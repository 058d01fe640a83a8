#![forbid(unsafe_code)]

use segflow_broker::BrokerError;
use segflow_buffer::BufferError;
use segflow_drm::DrmError;
use segflow_net::NetError;
use segflow_pool::PoolError;
use thiserror::Error;

/// Errors surfaced by a segmented stream.
///
/// Fatal errors are recorded once in the stream state and returned by the
/// next read after the buffered data is drained.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Read timeout")]
    ReadTimeout,

    #[error("Failed to fetch segment {sequence}: {source}")]
    SegmentFetch {
        sequence: u64,
        #[source]
        source: NetError,
    },

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Stream does not support seeking")]
    SeekNotSupported,

    #[error("Seek position {position} is outside the stream (length {length:?})")]
    InvalidSeek { position: u64, length: Option<u64> },

    #[error("Stream coordination failed: {0}")]
    Coordination(BrokerError),

    #[error("Thread pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Failed to spawn stream thread: {0}")]
    Spawn(String),

    #[error("Stream is closed")]
    Closed,
}

impl StreamError {
    pub fn source_error<E: std::fmt::Display>(err: E) -> Self {
        Self::Source(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout)
    }
}

impl From<BrokerError> for StreamError {
    fn from(err: BrokerError) -> Self {
        // A closed mailbox only ever means the stream is shutting down.
        if err.is_shutdown() {
            Self::Closed
        } else {
            Self::Coordination(err)
        }
    }
}

impl From<BufferError> for StreamError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::ReadTimeout => Self::ReadTimeout,
        }
    }
}

impl From<DrmError> for StreamError {
    fn from(err: DrmError) -> Self {
        Self::Decryption(err.to_string())
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
