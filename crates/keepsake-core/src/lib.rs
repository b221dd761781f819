//! keepsake-core: shared vocabulary for the media worker and its host
//!
//! - `types`: content addresses, media kinds, mime → extension table
//! - `error`: the error-kind taxonomy and its `CODE: detail` wire form
//! - `protocol`: line-delimited JSON request/response messages
//! - `config`: the `keepsake.toml` schema

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ErrorKind, MediaError, MediaResult};
pub use protocol::{Command, Request, Response};
pub use types::{ContentAddress, MediaKind};
