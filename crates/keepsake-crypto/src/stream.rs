//! Sequential encrypt and decrypt over readers, byte slices, and files

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use keepsake_core::ContentAddress;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::chunk::{cipher, open_chunk, seal_chunk};
use crate::error::CodecError;
use crate::format::{layout_of_file, BlobHeader, BlobLayout, ChunkSize};
use crate::key::MasterKey;
use crate::{HEADER_LEN, NONCE_SIZE};

/// Result of an encrypt pass that also hashed the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOutcome {
    pub address: ContentAddress,
    pub plaintext_len: u64,
}

/// Encrypt everything `reader` yields into `writer`. Returns the number of
/// plaintext bytes consumed.
pub fn encrypt_stream<R: Read, W: Write>(
    key: &MasterKey,
    reader: R,
    writer: W,
    chunk_size: ChunkSize,
) -> Result<u64, CodecError> {
    encrypt_chunked(key, reader, writer, chunk_size.bytes(), |_| {})
}

/// Like [`encrypt_stream`], also computing the SHA-256 content address of
/// the plaintext in the same pass.
pub fn encrypt_stream_with_address<R: Read, W: Write>(
    key: &MasterKey,
    reader: R,
    writer: W,
    chunk_size: ChunkSize,
) -> Result<EncryptOutcome, CodecError> {
    let mut hasher = Sha256::new();
    let plaintext_len = encrypt_chunked(key, reader, writer, chunk_size.bytes(), |chunk| {
        hasher.update(chunk)
    })?;
    let digest: [u8; 32] = hasher.finalize().into();
    Ok(EncryptOutcome {
        address: ContentAddress::from_digest(&digest),
        plaintext_len,
    })
}

pub fn encrypt_bytes(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let chunk_size = ChunkSize::for_plaintext_len(plaintext.len() as u64);
    let chunks = plaintext.len().div_ceil(chunk_size.bytes() as usize);
    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + chunks * crate::TAG_SIZE);
    encrypt_stream(key, plaintext, &mut out, chunk_size)?;
    Ok(out)
}

/// Encrypt the file at `src` to `dst`, choosing the chunk size from the
/// source length. `dst` appears only once fully written.
pub fn encrypt_file(key: &MasterKey, src: &Path, dst: &Path) -> Result<u64, CodecError> {
    let source = File::open(src)?;
    let chunk_size = ChunkSize::for_plaintext_len(source.metadata()?.len());
    let mut tmp = NamedTempFile::new_in(parent_dir(dst))?;
    let written = encrypt_stream(
        key,
        BufReader::new(source),
        BufWriter::new(tmp.as_file_mut()),
        chunk_size,
    )?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst)?;
    Ok(written)
}

pub(crate) fn encrypt_chunked<R: Read, W: Write>(
    key: &MasterKey,
    mut reader: R,
    mut writer: W,
    chunk_bytes: u32,
    mut observe: impl FnMut(&[u8]),
) -> Result<u64, CodecError> {
    let mut base_nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut base_nonce);
    let header = BlobHeader {
        chunk_size: chunk_bytes,
        base_nonce,
    };
    writer.write_all(&header.encode())?;

    let cipher = cipher(key);
    let mut buf = vec![0u8; chunk_bytes as usize];
    let mut index = 0u64;
    let mut total = 0u64;
    loop {
        let n = read_full(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        observe(&buf[..n]);
        let sealed = seal_chunk(&cipher, &header.base_nonce, index, &buf[..n])?;
        writer.write_all(&sealed)?;
        total += n as u64;
        index += 1;
        if n < buf.len() {
            break;
        }
    }
    writer.flush()?;
    tracing::trace!(chunks = index, bytes = total, "blob sealed");
    Ok(total)
}

/// Decrypt an in-memory blob. Returns only after every chunk verifies.
pub fn decrypt_bytes(key: &MasterKey, blob: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = BlobHeader::decode(blob)?;
    let layout = BlobLayout::new(header, blob.len() as u64)?;
    let mut out = Vec::with_capacity(layout.plaintext_len() as usize);
    decrypt_chunks(key, &layout, &blob[HEADER_LEN..], &mut out)?;
    Ok(out)
}

/// Decrypt the blob at `path` into memory. Returns only after every chunk
/// verifies; a failure drops the partial buffer.
pub fn decrypt_to_vec(key: &MasterKey, path: &Path) -> Result<Vec<u8>, CodecError> {
    let (file, layout) = layout_of_file(path)?;
    let mut out = Vec::with_capacity(layout.plaintext_len() as usize);
    decrypt_chunks(key, &layout, BufReader::new(file), &mut out)?;
    Ok(out)
}

/// Decrypt the blob at `src` into a fresh temp file inside `dir`.
///
/// The temp file is unlinked on any failure; on success the caller decides
/// how to place it.
pub fn decrypt_to_temp(key: &MasterKey, src: &Path, dir: &Path) -> Result<NamedTempFile, CodecError> {
    let (file, layout) = layout_of_file(src)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        decrypt_chunks(key, &layout, BufReader::new(file), &mut writer)?;
        writer.flush()?;
    }
    Ok(tmp)
}

/// Decrypt `src` to `dst`; `dst` is written only if every chunk verifies.
pub fn decrypt_file(key: &MasterKey, src: &Path, dst: &Path) -> Result<u64, CodecError> {
    let tmp = decrypt_to_temp(key, src, parent_dir(dst))?;
    let len = tmp.as_file().metadata()?.len();
    tmp.persist(dst)?;
    Ok(len)
}

fn decrypt_chunks<R: Read, W: Write>(
    key: &MasterKey,
    layout: &BlobLayout,
    mut payload: R,
    mut out: W,
) -> Result<(), CodecError> {
    let cipher = cipher(key);
    let mut sealed = vec![0u8; layout.header.chunk_size as usize + crate::TAG_SIZE];
    for index in 0..layout.chunk_count() {
        let (_, len) = layout.sealed_span(index);
        payload
            .read_exact(&mut sealed[..len])
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    CodecError::format(format!("blob shrank while reading chunk {index}"))
                }
                _ => CodecError::Io(e),
            })?;
        let plain = open_chunk(&cipher, &layout.header.base_nonce, index, &sealed[..len])?;
        out.write_all(&plain)?;
    }
    Ok(())
}

/// Fill `buf` as far as the reader allows; short only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
