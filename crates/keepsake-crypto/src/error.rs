use keepsake_core::{ErrorKind, MediaError};
use thiserror::Error;

/// Failures of the blob codec.
///
/// None of these leave partial output behind: buffers are dropped and temp
/// files are unlinked before the error reaches the caller.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid blob format: {0}")]
    InvalidFormat(String),

    #[error("authentication failed at chunk {chunk}")]
    AuthenticationFailure { chunk: u64 },

    #[error("chunk encryption failed at chunk {chunk}")]
    Seal { chunk: u64 },

    #[error("decrypt pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        CodecError::InvalidFormat(msg.into())
    }
}

impl From<tempfile::PersistError> for CodecError {
    fn from(e: tempfile::PersistError) -> Self {
        CodecError::Io(e.error)
    }
}

impl From<CodecError> for MediaError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidFormat(_) => MediaError::new(ErrorKind::InvalidFormat, e.to_string()),
            CodecError::AuthenticationFailure { .. } => {
                MediaError::new(ErrorKind::AuthenticationFailure, e.to_string())
            }
            CodecError::Io(io) => MediaError::from(io),
            CodecError::Seal { .. } | CodecError::Pool(_) => MediaError::internal(e.to_string()),
        }
    }
}
