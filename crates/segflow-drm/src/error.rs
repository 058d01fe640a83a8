#![forbid(unsafe_code)]

use thiserror::Error;

/// DRM decryption errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DrmError {
    #[error("AES-128-CBC decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid IV length: expected at most 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("Unsupported encryption method: {0}")]
    UnsupportedMethod(String),
}

pub type DrmResult<T> = Result<T, DrmError>;
