#![forbid(unsafe_code)]

//! AES-128-CBC decryption of HLS media segments.
//!
//! [`SegmentDecryptor`] consumes ciphertext in arbitrarily sized network
//! chunks and produces plaintext as soon as whole cipher blocks are available.

mod context;
mod decrypt;
mod error;

pub use crate::{
    context::{DecryptContext, iv_from_sequence},
    decrypt::{SegmentDecryptor, plaintext_len},
    error::{DrmError, DrmResult},
};
