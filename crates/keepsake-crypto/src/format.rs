//! Blob header, chunk-size policy, and layout arithmetic

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::CodecError;
use crate::{HEADER_LEN, MAGIC, MAX_CHUNK_SIZE, NONCE_SIZE, TAG_SIZE, VERSION};

/// Chunk size chosen for a blob at encryption time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSize {
    /// 1 MiB
    Standard,
    /// 4 MiB, for plaintexts of 64 MiB and up
    Large,
}

impl ChunkSize {
    pub const STANDARD_BYTES: u32 = 1024 * 1024;
    pub const LARGE_BYTES: u32 = 4 * 1024 * 1024;
    /// Plaintext length from which `Large` is used
    pub const LARGE_THRESHOLD: u64 = 64 * 1024 * 1024;

    pub fn for_plaintext_len(len: u64) -> Self {
        if len >= Self::LARGE_THRESHOLD {
            ChunkSize::Large
        } else {
            ChunkSize::Standard
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            ChunkSize::Standard => Self::STANDARD_BYTES,
            ChunkSize::Large => Self::LARGE_BYTES,
        }
    }
}

/// The fixed 21-byte blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub chunk_size: u32,
    pub base_nonce: [u8; NONCE_SIZE],
}

impl BlobHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4] = VERSION;
        out[5..9].copy_from_slice(&self.chunk_size.to_be_bytes());
        out[9..].copy_from_slice(&self.base_nonce);
        out
    }

    /// Parse and validate a header. Rejects bad magic, unknown versions, and
    /// chunk sizes of zero or above `MAX_CHUNK_SIZE`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::format(format!(
                "header truncated: {} bytes (expected {HEADER_LEN})",
                bytes.len()
            )));
        }
        if bytes[..4] != MAGIC {
            return Err(CodecError::format("bad magic"));
        }
        if bytes[4] != VERSION {
            return Err(CodecError::format(format!(
                "unsupported version {} (expected {VERSION})",
                bytes[4]
            )));
        }
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[5..9]);
        let chunk_size = u32::from_be_bytes(size);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(CodecError::format(format!(
                "chunk size {chunk_size} out of range (1..={MAX_CHUNK_SIZE})"
            )));
        }
        let mut base_nonce = [0u8; NONCE_SIZE];
        base_nonce.copy_from_slice(&bytes[9..HEADER_LEN]);
        Ok(Self {
            chunk_size,
            base_nonce,
        })
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::format("header truncated"),
            _ => CodecError::Io(e),
        })?;
        Self::decode(&buf)
    }
}

/// Chunk geometry of a blob, recomputed from its header and total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLayout {
    pub header: BlobHeader,
    pub total_len: u64,
    plaintext_len: u64,
    chunk_count: u64,
}

impl BlobLayout {
    pub fn new(header: BlobHeader, total_len: u64) -> Result<Self, CodecError> {
        if total_len < HEADER_LEN as u64 {
            return Err(CodecError::format(format!(
                "blob of {total_len} bytes is shorter than its header"
            )));
        }
        let payload = total_len - HEADER_LEN as u64;
        let cs = header.chunk_size as u64;
        let sealed = cs + TAG_SIZE as u64;
        let full = payload / sealed;
        let rem = payload % sealed;

        let (plaintext_len, chunk_count) = match rem {
            0 => (full * cs, full),
            r if r < TAG_SIZE as u64 => {
                return Err(CodecError::format(format!(
                    "trailing {r} bytes cannot hold a {TAG_SIZE}-byte tag"
                )))
            }
            r => (full * cs + r - TAG_SIZE as u64, full + 1),
        };

        Ok(Self {
            header,
            total_len,
            plaintext_len,
            chunk_count,
        })
    }

    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Byte offset and length of sealed chunk `index` within the blob.
    pub fn sealed_span(&self, index: u64) -> (u64, usize) {
        let sealed = self.header.chunk_size as u64 + TAG_SIZE as u64;
        let offset = HEADER_LEN as u64 + index * sealed;
        let len = sealed.min(self.total_len - offset);
        (offset, len as usize)
    }

    /// Byte offset of chunk `index`'s plaintext in the decrypted output.
    pub fn plaintext_offset(&self, index: u64) -> u64 {
        index * self.header.chunk_size as u64
    }
}

/// Plaintext length of a blob with `header` and `total_len` bytes on disk.
/// Pure arithmetic; never decrypts.
pub fn plaintext_len(header: &BlobHeader, total_len: u64) -> Result<u64, CodecError> {
    BlobLayout::new(*header, total_len).map(|l| l.plaintext_len())
}

/// Plaintext length of the blob at `path`, reading only its header.
pub fn plaintext_len_of_file(path: &Path) -> Result<u64, CodecError> {
    Ok(layout_of_file(path)?.1.plaintext_len())
}

pub(crate) fn layout_of_file(path: &Path) -> Result<(File, BlobLayout), CodecError> {
    let mut file = File::open(path)?;
    let total_len = file.metadata()?.len();
    let header = BlobHeader::read_from(&mut file)?;
    let layout = BlobLayout::new(header, total_len)?;
    Ok((file, layout))
}
