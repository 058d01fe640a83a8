use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Read timeout")]
    ReadTimeout,
}

pub type BufferResult<T> = Result<T, BufferError>;
