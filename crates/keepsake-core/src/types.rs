use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MediaError;

/// Length of a hex-encoded SHA-256 digest
pub const ADDRESS_HEX_LEN: usize = 64;

/// The SHA-256 digest of a plaintext blob, as 64 lowercase hex chars.
///
/// Doubles as the on-disk filename of the encrypted original and the stem
/// of its derived thumbnails, so construction rejects anything that is not
/// exactly a digest before it can reach a path join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn parse(input: &str) -> Result<Self, MediaError> {
        if input.len() != ADDRESS_HEX_LEN {
            return Err(MediaError::invalid_request(format!(
                "invalid content address: expected {ADDRESS_HEX_LEN} hex chars, got {}",
                input.len()
            )));
        }
        if !input.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MediaError::invalid_request(
                "invalid content address: non-hex characters",
            ));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    /// Wrap a raw 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentAddress {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = MediaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentAddress> for String {
    fn from(value: ContentAddress) -> Self {
        value.0
    }
}

/// Broad media class of an attachment, from its mime hint or catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default();
        match top.to_ascii_lowercase().as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    /// Video and audio players need a seekable file, never an inline payload.
    pub fn needs_seekable_file(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

/// File extension for a decrypted session file, so players can sniff the
/// container from the name.
pub fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        "video/x-matroska" => Some("mkv"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/wav" => Some("wav"),
        _ => None,
    }
}

/// Extension for an optional mime hint; unknown or absent hints map to `bin`.
pub fn extension_for(mime: Option<&str>) -> &'static str {
    mime.and_then(mime_extension).unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const ADDR: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn parses_valid_address() {
        let addr = ContentAddress::parse(ADDR).unwrap();
        assert_eq!(addr.as_str(), ADDR);
    }

    #[test]
    fn uppercase_is_normalised() {
        let addr = ContentAddress::parse(&ADDR.to_uppercase()).unwrap();
        assert_eq!(addr.as_str(), ADDR);
    }

    #[test]
    fn rejects_traversal_and_short_input() {
        for bad in ["../../etc/passwd", "abc", "", &format!("{}/", &ADDR[..63])] {
            let err = ContentAddress::parse(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest, "input {bad:?}");
        }
    }

    #[test]
    fn from_digest_matches_hex() {
        let digest = [0xABu8; 32];
        assert_eq!(ContentAddress::from_digest(&digest).as_str(), "ab".repeat(32));
    }

    #[test]
    fn from_digest_keeps_leading_zero_nibbles() {
        let mut digest = [0u8; 32];
        digest[0] = 0x0f;
        digest[31] = 0xa0;
        let address = ContentAddress::from_digest(&digest);
        assert!(address.as_str().starts_with("0f00"));
        assert!(address.as_str().ends_with("00a0"));
        assert_eq!(ContentAddress::parse(address.as_str()).unwrap(), address);
    }

    #[test]
    fn serde_validates() {
        let ok: ContentAddress = serde_json::from_str(&format!("\"{ADDR}\"")).unwrap();
        assert_eq!(ok.as_str(), ADDR);
        assert!(serde_json::from_str::<ContentAddress>("\"nope\"").is_err());
    }

    #[test]
    fn media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("Audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Other);
        assert!(MediaKind::Video.needs_seekable_file());
        assert!(!MediaKind::Image.needs_seekable_file());
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_for(Some("video/quicktime")), "mov");
        assert_eq!(extension_for(Some("application/x-unknown")), "bin");
        assert_eq!(extension_for(None), "bin");
    }
}
