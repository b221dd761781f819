//! Temp file → final name, without ever replacing an existing file.
//!
//! Two workers (or two requests) deriving the same content race to the same
//! name. Whoever links first wins; the loser's temp file is dropped and the
//! existing file is treated as the result, since equal names mean equal
//! content.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// This call created the destination.
    Placed,
    /// The destination already existed and was left untouched.
    AlreadyPresent,
}

/// Move a fully written temp file to `dst` unless `dst` exists.
pub fn place_noclobber(tmp: NamedTempFile, dst: &Path) -> io::Result<Placement> {
    match tmp.persist_noclobber(dst) {
        Ok(_) => Ok(Placement::Placed),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(dst = %dst.display(), "destination already present; keeping existing file");
            Ok(Placement::AlreadyPresent)
        }
        Err(e) => Err(e.error),
    }
}

/// Write `bytes` to a temp file beside `dst`, sync it, and place it.
pub fn write_noclobber(dst: &Path, bytes: &[u8]) -> io::Result<Placement> {
    let dir = dst
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    place_noclobber(tmp, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_first_write_places() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("thumb.bin");
        assert_eq!(write_noclobber(&dst, b"one").unwrap(), Placement::Placed);
        assert_eq!(std::fs::read(&dst).unwrap(), b"one");
    }

    #[test]
    fn test_existing_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("thumb.bin");
        std::fs::write(&dst, b"original").unwrap();

        assert_eq!(
            write_noclobber(&dst, b"replacement").unwrap(),
            Placement::AlreadyPresent
        );
        assert_eq!(std::fs::read(&dst).unwrap(), b"original");
        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1, "loser's temp file must be removed");
    }

    #[test]
    fn test_concurrent_placement_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let dst = Arc::new(dir.path().join("race.bin"));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2u8)
            .map(|i| {
                let dst = dst.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    write_noclobber(&dst, &[i; 64]).unwrap()
                })
            })
            .collect();
        let results: Vec<Placement> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(
            results.iter().filter(|p| **p == Placement::Placed).count(),
            1
        );
        assert_eq!(std::fs::read(&*dst).unwrap().len(), 64);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
