use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use keepsake_core::config::ArchiveConfig;
use keepsake_core::{ContentAddress, MediaError, MediaResult};

/// Path arithmetic and read access for one archive directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    attachments: PathBuf,
    thumbs: PathBuf,
    session_media: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(&ArchiveConfig { dir: root.into() })
    }

    pub fn from_config(archive: &ArchiveConfig) -> Self {
        Self {
            root: archive.root(),
            attachments: archive.attachments_dir(),
            thumbs: archive.thumbs_dir(),
            session_media: archive.session_media_dir(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments
    }

    pub fn thumbs_dir(&self) -> &Path {
        &self.thumbs
    }

    pub fn session_media_dir(&self) -> &Path {
        &self.session_media
    }

    pub fn attachment_path(&self, address: &ContentAddress) -> PathBuf {
        self.attachments.join(address.as_str())
    }

    pub fn thumbnail_path(&self, address: &ContentAddress, max_dimension: u32) -> PathBuf {
        self.thumbs.join(format!("{address}_{max_dimension}.bin"))
    }

    pub fn session_media_path(&self, address: &ContentAddress, extension: &str) -> PathBuf {
        self.session_media.join(format!("{address}.{extension}"))
    }

    /// Path of the original for `address`, or `NotFound`.
    pub fn require_attachment(&self, address: &ContentAddress) -> MediaResult<PathBuf> {
        let path = self.attachment_path(address);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(MediaError::not_found(format!("{address}: not a regular file"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(MediaError::not_found(format!("no blob for {address}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Plaintext length of the original for `address`, from its header only.
    pub fn plaintext_len(&self, address: &ContentAddress) -> MediaResult<u64> {
        let path = self.require_attachment(address)?;
        Ok(keepsake_crypto::plaintext_len_of_file(&path)?)
    }

    /// Create the directories the worker writes into.
    pub fn ensure_writable_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.thumbs)?;
        fs::create_dir_all(&self.session_media)
    }

    /// Delete every file in the session media directory and recreate it.
    pub fn reset_session_media(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.session_media) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.session_media)?;
        tracing::debug!(dir = %self.session_media.display(), "session media directory reset");
        Ok(())
    }
}
