//! keepsake-store: the on-disk archive layout
//!
//! ```text
//! <archive>/attachments/<address>              original, written once by the importer
//! <archive>/thumbs/<address>_<max>.bin         derived thumbnail, written by the worker
//! <archive>/previews/session/media/<address>.<ext>   decrypted, worker-owned, wiped per session
//! ```
//!
//! Originals are only ever read. Everything the worker writes goes through
//! a temp file in the destination directory and a no-clobber placement.

pub mod blobs;
pub mod health;
pub mod place;

pub use blobs::BlobStore;
pub use health::check_layout;
pub use place::{place_noclobber, write_noclobber, Placement};
