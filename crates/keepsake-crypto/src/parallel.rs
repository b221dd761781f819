//! Multi-threaded decrypt for large blobs
//!
//! The output temp file is pre-sized to the exact plaintext length. A pool of
//! exactly `workers` threads claims chunk indices from a shared counter and
//! each thread reads, opens, and writes its chunk with positional I/O, so no
//! thread ever waits on another's file cursor. Every thread runs until the
//! counter is exhausted or a failure is recorded; any failure discards the
//! whole output.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::chunk::{cipher, open_chunk};
use crate::error::CodecError;
use crate::format::layout_of_file;
use crate::key::MasterKey;

/// Decrypt `src` into a temp file inside `dir` using `workers` threads.
pub fn parallel_decrypt_to_temp(
    key: &MasterKey,
    src: &Path,
    dir: &Path,
    workers: usize,
) -> Result<NamedTempFile, CodecError> {
    let (source, layout) = layout_of_file(src)?;
    let tmp = NamedTempFile::new_in(dir)?;
    tmp.as_file().set_len(layout.plaintext_len())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("keepsake-decrypt-{i}"))
        .build()
        .map_err(|e| CodecError::Pool(e.to_string()))?;

    let cipher = cipher(key);
    let next = AtomicU64::new(0);
    let aborted = AtomicBool::new(false);
    let failure: Mutex<Option<CodecError>> = Mutex::new(None);
    let output = tmp.as_file();

    pool.broadcast(|_| {
        let mut sealed = vec![0u8; layout.header.chunk_size as usize + crate::TAG_SIZE];
        while !aborted.load(Ordering::Relaxed) {
            let index = next.fetch_add(1, Ordering::Relaxed);
            if index >= layout.chunk_count() {
                break;
            }
            let (offset, len) = layout.sealed_span(index);
            let result = read_exact_at(&source, &mut sealed[..len], offset)
                .map_err(CodecError::from)
                .and_then(|()| {
                    open_chunk(&cipher, &layout.header.base_nonce, index, &sealed[..len])
                })
                .and_then(|plain| {
                    write_all_at(output, &plain, layout.plaintext_offset(index))
                        .map_err(CodecError::from)
                });
            if let Err(e) = result {
                aborted.store(true, Ordering::Relaxed);
                let mut slot = failure.lock().unwrap_or_else(|p| p.into_inner());
                if slot.is_none() {
                    *slot = Some(e);
                }
                break;
            }
        }
    });

    if let Some(e) = failure.into_inner().unwrap_or_else(|p| p.into_inner()) {
        tracing::debug!(src = %src.display(), error = %e, "parallel decrypt failed");
        return Err(e);
    }
    output.sync_data()?;
    tracing::debug!(
        src = %src.display(),
        chunks = layout.chunk_count(),
        bytes = layout.plaintext_len(),
        workers,
        "parallel decrypt complete"
    );
    Ok(tmp)
}

/// Decrypt `src` to `dst` with `workers` threads; `dst` is written only if
/// every chunk verifies.
pub fn parallel_decrypt_file(
    key: &MasterKey,
    src: &Path,
    dst: &Path,
    workers: usize,
) -> Result<u64, CodecError> {
    let dir = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = parallel_decrypt_to_temp(key, src, dir, workers)?;
    let len = tmp.as_file().metadata()?.len();
    tmp.persist(dst)?;
    Ok(len)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::{pattern, seal_with};
    use crate::stream::{decrypt_bytes, encrypt_bytes};
    use crate::{HEADER_LEN, TAG_SIZE};

    fn write_blob(dir: &Path, blob: &[u8]) -> std::path::PathBuf {
        let path = dir.join("blob");
        std::fs::write(&path, blob).unwrap();
        path
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::generate();
        // 12 full chunks plus a short tail
        let data = pattern(12 * 4096 + 1234);
        let blob = seal_with(&key, &data, 4096);
        let src = write_blob(dir.path(), &blob);

        for workers in [1, 2, 4, 7] {
            let tmp = parallel_decrypt_to_temp(&key, &src, dir.path(), workers).unwrap();
            assert_eq!(tmp.as_file().metadata().unwrap().len(), data.len() as u64);
            assert_eq!(std::fs::read(tmp.path()).unwrap(), decrypt_bytes(&key, &blob).unwrap());
        }
    }

    #[test]
    fn test_parallel_standard_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::generate();
        let data = pattern(3 * crate::ChunkSize::STANDARD_BYTES as usize + 99);
        let src = write_blob(dir.path(), &encrypt_bytes(&key, &data).unwrap());
        let dst = dir.path().join("plain.bin");

        let len = parallel_decrypt_file(&key, &src, &dst, 4).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
    }

    #[test]
    fn test_parallel_empty_blob() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::generate();
        let src = write_blob(dir.path(), &encrypt_bytes(&key, b"").unwrap());
        let tmp = parallel_decrypt_to_temp(&key, &src, dir.path(), 4).unwrap();
        assert_eq!(tmp.as_file().metadata().unwrap().len(), 0);
    }

    #[test]
    fn test_parallel_tamper_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::generate();
        let mut blob = seal_with(&key, &pattern(10 * 512), 512);
        let seventh = HEADER_LEN + 7 * (512 + TAG_SIZE);
        blob[seventh + 100] ^= 0x04;
        let src = write_blob(dir.path(), &blob);
        let dst = dir.path().join("plain.bin");

        let err = parallel_decrypt_file(&key, &src, &dst, 4).unwrap_err();
        assert!(matches!(err, CodecError::AuthenticationFailure { chunk: 7 }));
        assert!(!dst.exists());
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1, "only the source blob should remain");
    }

    #[test]
    fn test_parallel_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = parallel_decrypt_to_temp(
            &MasterKey::generate(),
            &dir.path().join("absent"),
            dir.path(),
            2,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
