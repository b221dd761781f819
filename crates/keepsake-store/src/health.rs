//! Archive layout check

use anyhow::Result;

use crate::blobs::BlobStore;

/// Verify the attachments directory is present and listable.
pub fn check_layout(store: &BlobStore) -> Result<()> {
    std::fs::read_dir(store.attachments_dir())
        .map(|_| ())
        .map_err(|e| {
            anyhow::anyhow!(
                "archive layout check failed for {}: {e}",
                store.attachments_dir().display()
            )
        })
}

/// Returns true if the archive looks usable, false otherwise (non-panicking)
pub fn is_healthy(store: &BlobStore) -> bool {
    check_layout(store).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_attachments_dir_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        assert!(!is_healthy(&store));

        std::fs::create_dir_all(store.attachments_dir()).unwrap();
        assert!(is_healthy(&store));
    }
}
