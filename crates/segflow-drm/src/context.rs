#![forbid(unsafe_code)]

use crate::{DrmError, DrmResult};

/// Key and IV for one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptContext {
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

impl DecryptContext {
    /// Build from raw key material.
    ///
    /// Short IVs are left-padded with zeros.
    ///
    /// # Errors
    ///
    /// [`DrmError::InvalidKeyLength`] or [`DrmError::InvalidIvLength`].
    pub fn new(key: &[u8], iv: &[u8]) -> DrmResult<Self> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| DrmError::InvalidKeyLength(key.len()))?;
        if iv.len() > 16 {
            return Err(DrmError::InvalidIvLength(iv.len()));
        }
        let mut padded = [0u8; 16];
        padded[16 - iv.len()..].copy_from_slice(iv);
        Ok(Self { key, iv: padded })
    }

    /// Use the playlist IV if given, else derive it from the media sequence.
    ///
    /// # Errors
    ///
    /// [`DrmError::InvalidKeyLength`] for keys that are not 16 bytes.
    pub fn for_segment(key: &[u8], iv: Option<[u8; 16]>, sequence: u64) -> DrmResult<Self> {
        let iv = iv.unwrap_or_else(|| iv_from_sequence(sequence));
        Self::new(key, &iv)
    }
}

/// Default HLS IV: the media sequence number as a 128-bit big-endian integer.
pub fn iv_from_sequence(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}
