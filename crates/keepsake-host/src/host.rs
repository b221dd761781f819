//! `MediaHost`: the application's handle on the media worker.
//!
//! The worker is spawned lazily on the first request. If it has exited by
//! the time of a later request, a fresh one is spawned in its place; if that
//! spawn fails the request fails with `WORKER_UNAVAILABLE`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keepsake_core::config::HostConfig;
use keepsake_core::protocol::{
    ClearedPayload, CommandClass, DataUrlPayload, DataUrlRequest, EvictionsPayload,
    MediaPathPayload, MediaPathRequest, ThumbnailPayload, ThumbnailRequest,
};
use keepsake_core::{Command, ContentAddress, ErrorKind, MediaError, MediaKind, MediaResult};
use serde::de::DeserializeOwned;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::caches::HostCaches;
use crate::client::Connection;
use crate::launcher::WorkerLauncher;

/// How long the host waits for each class of command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub quick: Duration,
    pub shutdown: Duration,
    pub thumbnail: Duration,
    pub media: Duration,
}

impl Timeouts {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            quick: Duration::from_millis(config.quick_timeout_ms),
            shutdown: Duration::from_millis(config.shutdown_timeout_ms),
            thumbnail: Duration::from_millis(config.thumbnail_timeout_ms),
            media: Duration::from_millis(config.media_timeout_ms),
        }
    }

    pub fn for_class(&self, class: CommandClass) -> Duration {
        match class {
            CommandClass::Quick => self.quick,
            CommandClass::Shutdown => self.shutdown,
            CommandClass::Thumbnail => self.thumbnail,
            CommandClass::Media => self.media,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

/// What the caller wants to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// A bounded preview, longest side at most this many pixels.
    Thumbnail(u32),
    Full,
}

/// How a piece of media should be presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Inline(String),
    File(PathBuf),
}

struct Worker {
    child: Child,
    conn: Arc<Connection>,
}

impl Worker {
    fn is_running(&mut self) -> bool {
        self.conn.is_alive() && matches!(self.child.try_wait(), Ok(None))
    }
}

pub struct MediaHost {
    launcher: WorkerLauncher,
    timeouts: Timeouts,
    caches: HostCaches,
    next_id: AtomicU64,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl MediaHost {
    pub fn new(launcher: WorkerLauncher, config: &HostConfig) -> Self {
        Self::with_timeouts(launcher, config, Timeouts::from_config(config))
    }

    pub fn with_timeouts(launcher: WorkerLauncher, config: &HostConfig, timeouts: Timeouts) -> Self {
        Self {
            launcher,
            timeouts,
            caches: HostCaches::from_config(config),
            next_id: AtomicU64::new(1),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn caches(&self) -> &HostCaches {
        &self.caches
    }

    /// Pid of the current worker, if one is running.
    pub async fn worker_pid(&self) -> Option<u32> {
        let mut slot = self.worker.lock().await;
        let worker = slot.as_mut()?;
        if worker.is_running() {
            worker.child.id()
        } else {
            None
        }
    }

    async fn connection(&self) -> MediaResult<Arc<Connection>> {
        let mut slot = self.worker.lock().await;
        if let Some(worker) = slot.as_mut() {
            if worker.is_running() {
                return Ok(worker.conn.clone());
            }
            warn!(
                status = ?worker.child.try_wait().ok().flatten(),
                "worker is gone; respawning"
            );
            // paths pointed into the dead worker's session directory
            self.caches.clear_paths();
        }
        *slot = None;

        let (child, conn) = self.launcher.spawn().map_err(|e| {
            MediaError::worker_unavailable(format!("{e:#}"))
        })?;
        let conn = Arc::new(conn);
        *slot = Some(Worker {
            child,
            conn: conn.clone(),
        });
        Ok(conn)
    }

    /// Send one command and decode its payload.
    pub async fn send<T: DeserializeOwned>(&self, command: Command) -> MediaResult<T> {
        let conn = self.connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        let timeout = self.timeouts.for_class(command.class());

        let started = Instant::now();
        let result = conn.request(id, command, timeout).await;
        debug!(
            id,
            command = name,
            ok = matches!(&result, Ok(r) if r.ok),
            elapsed_ms = started.elapsed().as_millis() as u64,
            in_flight = conn.in_flight(),
            "worker request"
        );
        result?.into_payload()
    }

    pub async fn thumbnail(
        &self,
        address: &ContentAddress,
        mime_hint: Option<&str>,
        max_dimension: u32,
    ) -> MediaResult<String> {
        if let Some(hit) = self.caches.thumbnail(address, max_dimension) {
            return Ok(hit);
        }
        let payload: ThumbnailPayload = self
            .send(Command::Thumbnail(ThumbnailRequest {
                address: address.clone(),
                mime_hint: mime_hint.map(str::to_string),
                max_dimension,
            }))
            .await?;
        self.caches
            .put_thumbnail(address, max_dimension, payload.data_url.clone());
        Ok(payload.data_url)
    }

    pub async fn media_path(&self, address: &ContentAddress, mime_hint: &str) -> MediaResult<PathBuf> {
        if let Some(hit) = self.caches.path(address, mime_hint) {
            return Ok(hit);
        }
        let payload: MediaPathPayload = self
            .send(Command::MediaPath(MediaPathRequest {
                address: address.clone(),
                mime_hint: Some(mime_hint.to_string()),
            }))
            .await?;
        self.caches.put_path(address, mime_hint, payload.path.clone());
        Ok(payload.path)
    }

    pub async fn data_url(
        &self,
        address: &ContentAddress,
        mime_hint: &str,
        max_bytes: Option<u64>,
    ) -> MediaResult<String> {
        if let Some(hit) = self.caches.inline(address, mime_hint) {
            return Ok(hit);
        }
        let payload: DataUrlPayload = self
            .send(Command::DataUrl(DataUrlRequest {
                address: address.clone(),
                mime_hint: mime_hint.to_string(),
                max_bytes,
            }))
            .await?;
        self.caches
            .put_inline(address, mime_hint, payload.data_url.clone());
        Ok(payload.data_url)
    }

    /// Pick a presentation from the declared kind: thumbnails for image
    /// previews, a seekable file for audio and video, an inline data URL
    /// otherwise, falling back to a file when the inline form is too large.
    pub async fn resolve(
        &self,
        address: &ContentAddress,
        mime_hint: &str,
        kind: MediaKind,
        view: View,
    ) -> MediaResult<Resolved> {
        if kind.needs_seekable_file() {
            return self.media_path(address, mime_hint).await.map(Resolved::File);
        }
        if let (MediaKind::Image, View::Thumbnail(max)) = (kind, view) {
            return self
                .thumbnail(address, Some(mime_hint), max)
                .await
                .map(Resolved::Inline);
        }
        match self.data_url(address, mime_hint, None).await {
            Ok(url) => Ok(Resolved::Inline(url)),
            Err(e) if e.kind == ErrorKind::TooLarge => {
                debug!(%address, "inline payload too large; using a file");
                self.media_path(address, mime_hint).await.map(Resolved::File)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the worker to drop its decrypted files, and forget the session
    /// paths that pointed at them. Inline and thumbnail tiers are kept.
    pub async fn clear_cache(&self) -> MediaResult<bool> {
        let payload: ClearedPayload = self.send(Command::ClearCache).await?;
        self.caches.clear_paths();
        Ok(payload.cleared)
    }

    /// Collect addresses the worker evicted since the last drain and purge
    /// them from every host tier.
    pub async fn drain_evictions(&self) -> MediaResult<Vec<ContentAddress>> {
        let payload: EvictionsPayload = self.send(Command::DrainEvictions).await?;
        for address in &payload.addresses {
            self.caches.purge_address(address);
        }
        Ok(payload.addresses)
    }

    /// Stop the worker: ask politely, then kill it if it does not exit
    /// within the shutdown timeout. A no-op when no worker is running.
    pub async fn shutdown(&self) {
        let Some(mut worker) = self.worker.lock().await.take() else {
            return;
        };
        if worker.is_running() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = worker
                .conn
                .request(id, Command::Shutdown, self.timeouts.shutdown)
                .await
            {
                debug!("shutdown request failed: {e}");
            }
        }
        match tokio::time::timeout(self.timeouts.shutdown, worker.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "worker exited"),
            Ok(Err(e)) => warn!("waiting for worker: {e}"),
            Err(_) => {
                warn!("worker ignored shutdown; killing");
                if let Err(e) = worker.child.kill().await {
                    warn!("killing worker: {e}");
                }
            }
        }
        self.caches.clear_paths();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> ContentAddress {
        ContentAddress::from_digest(&[7; 32])
    }

    #[test]
    fn timeouts_follow_config() {
        let config = HostConfig {
            quick_timeout_ms: 10,
            shutdown_timeout_ms: 20,
            thumbnail_timeout_ms: 30,
            media_timeout_ms: 40,
            ..HostConfig::default()
        };
        let t = Timeouts::from_config(&config);
        assert_eq!(t.for_class(CommandClass::Quick), Duration::from_millis(10));
        assert_eq!(t.for_class(CommandClass::Shutdown), Duration::from_millis(20));
        assert_eq!(t.for_class(CommandClass::Thumbnail), Duration::from_millis(30));
        assert_eq!(t.for_class(CommandClass::Media), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn unspawnable_worker_is_unavailable() {
        let host = MediaHost::new(
            WorkerLauncher::new("/nonexistent/keepsake-worker"),
            &HostConfig::default(),
        );
        let err = host.drain_evictions().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerUnavailable);
        assert!(host.worker_pid().await.is_none());

        // every request retries the spawn
        let err = host.thumbnail(&addr(), None, 128).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerUnavailable);
    }

    #[tokio::test]
    async fn cached_answers_skip_the_worker() {
        let host = MediaHost::new(
            WorkerLauncher::new("/nonexistent/keepsake-worker"),
            &HostConfig::default(),
        );
        host.caches().put_thumbnail(&addr(), 256, "data:image/jpeg;base64,AA==".into());
        host.caches().put_inline(&addr(), "image/png", "data:image/png;base64,AA==".into());

        assert_eq!(
            host.resolve(&addr(), "image/png", MediaKind::Image, View::Thumbnail(256))
                .await
                .unwrap(),
            Resolved::Inline("data:image/jpeg;base64,AA==".into())
        );
        assert_eq!(
            host.resolve(&addr(), "image/png", MediaKind::Image, View::Full)
                .await
                .unwrap(),
            Resolved::Inline("data:image/png;base64,AA==".into())
        );
        // video always needs the worker
        let err = host
            .resolve(&addr(), "video/mp4", MediaKind::Video, View::Full)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerUnavailable);
    }

    #[tokio::test]
    async fn shutdown_without_worker_is_noop() {
        let host = MediaHost::new(
            WorkerLauncher::new("/nonexistent/keepsake-worker"),
            &HostConfig::default(),
        );
        host.shutdown().await;
        assert!(host.worker_pid().await.is_none());
    }
}
