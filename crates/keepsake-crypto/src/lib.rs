//! keepsake-crypto: at-rest encryption for archive blobs
//!
//! Architecture: fixed-size chunks, each sealed independently with AES-256-GCM
//!
//! Blob layout:
//! ```text
//! [4: magic "KSBL"][1: version][4: chunk size, BE][12: base nonce]
//! [chunk 0: ciphertext || 16-byte tag][chunk 1]...[chunk n-1, possibly short]
//!
//! nonce(i) = base_nonce[0..4] || i as u64 BE
//! ```
//!
//! Chunk boundaries are never stored; they are recomputed from the declared
//! chunk size and the total blob length, which is also how the plaintext
//! length is derived without decrypting.

pub mod chunk;
pub mod error;
pub mod format;
pub mod key;
pub mod parallel;
pub mod stream;

pub use error::CodecError;
pub use format::{plaintext_len, plaintext_len_of_file, BlobHeader, BlobLayout, ChunkSize};
pub use key::MasterKey;
pub use parallel::{parallel_decrypt_file, parallel_decrypt_to_temp};
pub use stream::{
    decrypt_bytes, decrypt_file, decrypt_to_temp, decrypt_to_vec, encrypt_bytes, encrypt_file,
    encrypt_stream, encrypt_stream_with_address, EncryptOutcome,
};

/// Size of the master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Blob magic bytes
pub const MAGIC: [u8; 4] = *b"KSBL";

/// Current blob format version
pub const VERSION: u8 = 1;

/// Fixed header length: magic + version + chunk size + base nonce
pub const HEADER_LEN: usize = 4 + 1 + 4 + NONCE_SIZE;

/// Largest chunk size a reader will accept from a header (8 MiB)
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;
