//! keepsake-worker: the out-of-process half of the media subsystem
//!
//! Owns every decrypt and thumbnail derivation. The host talks to it over
//! stdin/stdout, one JSON object per line (see `keepsake_core::protocol`);
//! logs go to stderr only.
//!
//! - `server`: the read loop and idle sweep timer
//! - `dispatch`: line parsing and the per-command handler table
//! - `handlers`: thumbnail, media-path, data-url, clear-cache, drain-evictions
//! - `cache`: decrypted session files with count/idle eviction
//! - `thumbnail`: decode → downscale → JPEG
//! - `state`: the single `WorkerState` shared by all handlers

pub mod cache;
pub mod dispatch;
pub mod handlers;
pub mod server;
pub mod state;
pub mod thumbnail;

pub use server::serve;
pub use state::WorkerState;
