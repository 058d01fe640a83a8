#![forbid(unsafe_code)]

//! Streaming AES-128-CBC decryption.

use aes::Aes128;
use bytes::Bytes;
use cbc::{
    Decryptor,
    cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding},
};
use tracing::{trace, warn};

use crate::{DecryptContext, DrmError, DrmResult};

const AES_BLOCK_SIZE: usize = 16;

/// Incremental decryptor for one segment.
///
/// Ciphertext may arrive in chunks of any size. The final cipher block is
/// always held back until [`finish`](Self::finish) so PKCS7 padding can be
/// stripped from it.
#[derive(Debug)]
pub struct SegmentDecryptor {
    ctx: DecryptContext,
    pending: Vec<u8>,
    decrypted: u64,
}

impl SegmentDecryptor {
    pub fn new(ctx: DecryptContext) -> Self {
        Self {
            ctx,
            pending: Vec::with_capacity(2 * AES_BLOCK_SIZE),
            decrypted: 0,
        }
    }

    /// Plaintext bytes produced so far.
    pub fn decrypted(&self) -> u64 {
        self.decrypted
    }

    /// Feed a ciphertext chunk, returning whatever plaintext is ready.
    ///
    /// # Errors
    ///
    /// [`DrmError::DecryptFailed`] if the cipher rejects the input.
    pub fn update(&mut self, chunk: &[u8]) -> DrmResult<Bytes> {
        self.pending.extend_from_slice(chunk);

        let len = self.pending.len();
        let residual = len % AES_BLOCK_SIZE;
        let keep = if residual == 0 {
            AES_BLOCK_SIZE.min(len)
        } else {
            residual + AES_BLOCK_SIZE
        };
        let ready = len.saturating_sub(keep);
        if ready == 0 {
            return Ok(Bytes::new());
        }

        let mut blocks: Vec<u8> = self.pending.drain(..ready).collect();
        self.decrypt_blocks(&mut blocks)?;
        trace!(bytes = blocks.len(), "decrypted intermediate chunk");
        Ok(Bytes::from(blocks))
    }

    /// Decrypt the held-back tail and strip PKCS7 padding.
    ///
    /// A trailing partial block cannot be decrypted and is discarded.
    /// Invalid padding leaves the final block as-is.
    ///
    /// # Errors
    ///
    /// [`DrmError::DecryptFailed`] if the cipher rejects the input.
    pub fn finish(mut self) -> DrmResult<Bytes> {
        let mut tail = std::mem::take(&mut self.pending);
        let residual = tail.len() % AES_BLOCK_SIZE;
        if residual != 0 {
            warn!(
                residual,
                "segment length is not a multiple of the AES block size, dropping tail"
            );
            tail.truncate(tail.len() - residual);
        }
        if tail.is_empty() {
            return Ok(Bytes::new());
        }

        self.decrypt_blocks(&mut tail)?;
        match pkcs7_len(&tail) {
            Some(len) => tail.truncate(len),
            None => warn!(
                total = self.decrypted,
                "invalid PKCS7 padding, keeping final block unpadded"
            ),
        }
        Ok(Bytes::from(tail))
    }

    fn decrypt_blocks(&mut self, blocks: &mut [u8]) -> DrmResult<()> {
        let mut next_iv = [0u8; AES_BLOCK_SIZE];
        next_iv.copy_from_slice(&blocks[blocks.len() - AES_BLOCK_SIZE..]);

        let decryptor = Decryptor::<Aes128>::new((&self.ctx.key).into(), (&self.ctx.iv).into());
        let written = decryptor
            .decrypt_padded_mut::<NoPadding>(blocks)
            .map_err(|e| DrmError::DecryptFailed(e.to_string()))?
            .len();

        self.ctx.iv = next_iv;
        self.decrypted += written as u64;
        Ok(())
    }
}

/// Plaintext length of a whole segment, known from its final cipher block.
///
/// `ctx.iv` must be the cipher block preceding `last_block`, or the segment IV
/// when the segment is a single block. Counts exactly what a
/// [`SegmentDecryptor`] emits for the segment, padding and dropped tail
/// included.
///
/// # Errors
///
/// [`DrmError::DecryptFailed`] if `last_block` is not one cipher block.
pub fn plaintext_len(ctx: DecryptContext, cipher_len: u64, last_block: &[u8]) -> DrmResult<u64> {
    let block = AES_BLOCK_SIZE as u64;
    let aligned = cipher_len - cipher_len % block;
    if aligned == 0 {
        return Ok(0);
    }
    if last_block.len() != AES_BLOCK_SIZE {
        return Err(DrmError::DecryptFailed(format!(
            "expected one {AES_BLOCK_SIZE} byte block, got {} bytes",
            last_block.len()
        )));
    }
    let mut decryptor = SegmentDecryptor::new(ctx);
    decryptor.update(last_block)?;
    let tail = decryptor.finish()?;
    Ok(aligned - block + tail.len() as u64)
}

/// Length of `plaintext` without valid PKCS7 padding, if present.
fn pkcs7_len(plaintext: &[u8]) -> Option<usize> {
    let pad = usize::from(*plaintext.last()?);
    if pad == 0 || pad > AES_BLOCK_SIZE || pad > plaintext.len() {
        return None;
    }
    let (body, padding) = plaintext.split_at(plaintext.len() - pad);
    padding
        .iter()
        .all(|&b| usize::from(b) == pad)
        .then_some(body.len())
}
