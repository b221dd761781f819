//! keepsake-host: the application side of the media worker
//!
//! - `launcher`: how the worker process is spawned
//! - `client`: one live stdio connection with id-correlated requests
//! - `host`: `MediaHost`, typed commands with per-class timeouts and respawn
//! - `caches`: in-memory tiers for data URLs, session paths and thumbnails
//! - `sync`: periodic eviction drain while a media view is visible

pub mod caches;
pub mod client;
pub mod host;
pub mod launcher;
pub mod sync;

pub use caches::{HostCaches, LruCache};
pub use client::Connection;
pub use host::{MediaHost, Resolved, Timeouts, View};
pub use launcher::WorkerLauncher;
pub use sync::{EvictionSync, ReloadSink};
