//! The archive master key

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// The single 256-bit key every blob in the archive is sealed with.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy a key out of a slice; `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self { bytes })
    }

    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let key = MasterKey::from_bytes([0x42; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("42"));
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(MasterKey::generate().as_bytes(), MasterKey::generate().as_bytes());
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(MasterKey::from_slice(&[0u8; 31]).is_none());
        assert!(MasterKey::from_slice(&[0u8; 33]).is_none());
        assert_eq!(MasterKey::from_slice(&[7u8; 32]).unwrap().as_bytes(), &[7u8; 32]);
    }
}
