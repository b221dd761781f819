use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Distinguishing kind of a media failure.
///
/// The kind survives the trip across the worker boundary as the `CODE`
/// prefix of the response `error` string, so the host can pick a UI
/// treatment ("wrong data" vs "try again" vs "file missing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Header magic, version, or layout mismatch
    InvalidFormat,
    /// A chunk tag failed to verify (tampering or corruption)
    AuthenticationFailure,
    /// Credential store present but unreadable (locked, denied, malformed)
    KeyUnavailable,
    /// The address has no backing blob
    NotFound,
    /// Declared plaintext too large to decode in memory
    ResourceExhausted,
    /// Plaintext above the inline-payload ceiling; fall back to `media-path`
    TooLarge,
    /// Malformed request: bad address, unknown command, bad payload
    InvalidRequest,
    Io,
    Internal,
    /// Host-side wait exceeded (never produced by the worker)
    Timeout,
    /// Worker channel closed or process could not be spawned
    WorkerUnavailable,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidFormat => "INVALID_FORMAT",
            ErrorKind::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            ErrorKind::KeyUnavailable => "KEY_UNAVAILABLE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::TooLarge => "TOO_LARGE",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Io => "IO",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::WorkerUnavailable => "WORKER_UNAVAILABLE",
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::WorkerUnavailable | ErrorKind::Io
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INVALID_FORMAT" => ErrorKind::InvalidFormat,
            "AUTHENTICATION_FAILURE" => ErrorKind::AuthenticationFailure,
            "KEY_UNAVAILABLE" => ErrorKind::KeyUnavailable,
            "NOT_FOUND" => ErrorKind::NotFound,
            "RESOURCE_EXHAUSTED" => ErrorKind::ResourceExhausted,
            "TOO_LARGE" => ErrorKind::TooLarge,
            "INVALID_REQUEST" => ErrorKind::InvalidRequest,
            "IO" => ErrorKind::Io,
            "INTERNAL" => ErrorKind::Internal,
            "TIMEOUT" => ErrorKind::Timeout,
            "WORKER_UNAVAILABLE" => ErrorKind::WorkerUnavailable,
            _ => return Err(()),
        })
    }
}

/// A typed media failure: a kind plus human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct MediaError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn worker_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Encode as the response `error` string: `CODE: detail`.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Decode a response `error` string. Strings without a recognised
    /// code prefix are kept whole as `Internal`.
    pub fn from_wire(raw: &str) -> Self {
        if let Some((code, detail)) = raw.split_once(": ") {
            if let Ok(kind) = code.parse::<ErrorKind>() {
                return Self::new(kind, detail);
            }
        }
        Self::new(ErrorKind::Internal, raw)
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for MediaError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_request(e.to_string())
    }
}
