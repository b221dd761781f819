use keepsake_core::{ErrorKind, MediaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    /// Store present but unreadable: locked, access denied, ambiguous entry
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("stored master key is malformed: {0}")]
    Malformed(String),

    #[error("writing master key to credential store: {0}")]
    Store(String),
}

impl From<KeyError> for MediaError {
    fn from(e: KeyError) -> Self {
        MediaError::new(ErrorKind::KeyUnavailable, e.to_string())
    }
}
