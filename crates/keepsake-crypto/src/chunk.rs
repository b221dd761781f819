//! Per-chunk AES-256-GCM sealing and opening
//!
//! Sealed chunk (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! nonce = base_nonce with bytes 4..12 replaced by chunk_index (u64, big-endian)
//! ```
//!
//! Binding the index into the nonce means a chunk moved to another position
//! fails to authenticate, without spending header space on per-chunk nonces.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::error::CodecError;
use crate::key::MasterKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Build the cipher once per blob; it is `Sync` and shared by decrypt workers.
pub fn cipher(key: &MasterKey) -> Aes256Gcm {
    Aes256Gcm::new(key.as_bytes().into())
}

/// Nonce of chunk `chunk_index`: the base nonce with its low 8 bytes
/// overwritten by the big-endian index.
pub fn chunk_nonce(base_nonce: &[u8; NONCE_SIZE], chunk_index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base_nonce;
    nonce[NONCE_SIZE - 8..].copy_from_slice(&chunk_index.to_be_bytes());
    nonce
}

/// Seal one chunk. Returns `[ciphertext][16-byte tag]`.
pub fn seal_chunk(
    cipher: &Aes256Gcm,
    base_nonce: &[u8; NONCE_SIZE],
    chunk_index: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let nonce = chunk_nonce(base_nonce, chunk_index);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::Seal { chunk: chunk_index })
}

/// Open one chunk, verifying its tag.
pub fn open_chunk(
    cipher: &Aes256Gcm,
    base_nonce: &[u8; NONCE_SIZE],
    chunk_index: u64,
    sealed: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if sealed.len() < TAG_SIZE {
        return Err(CodecError::format(format!(
            "chunk {chunk_index} too short: {} bytes (minimum {TAG_SIZE})",
            sealed.len()
        )));
    }
    let nonce = chunk_nonce(base_nonce, chunk_index);
    cipher
        .decrypt(Nonce::from_slice(&nonce), sealed)
        .map_err(|_| CodecError::AuthenticationFailure { chunk: chunk_index })
}
