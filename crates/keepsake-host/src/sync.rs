//! Eviction sync: while a media view is visible, periodically drain the
//! worker's eviction queue so the host forgets files the worker deleted and
//! the view can mark those attachments as needing a reload.

use std::sync::Arc;
use std::time::Duration;

use keepsake_core::ContentAddress;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::host::MediaHost;

/// Receives addresses whose decrypted form is gone.
pub trait ReloadSink: Send + Sync + 'static {
    fn mark_not_loaded(&self, address: &ContentAddress);
}

pub struct EvictionSync {
    host: Arc<MediaHost>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EvictionSync {
    pub fn start(host: Arc<MediaHost>, sink: Arc<dyn ReloadSink>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll(host.clone(), sink, interval, cancel.clone()));
        Self { host, cancel, task }
    }

    /// Stop polling. With `clear_worker`, also tell the worker to drop its
    /// decrypted files and empty every host tier.
    pub async fn stop(self, clear_worker: bool) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("eviction sync task failed: {e}");
        }
        if clear_worker {
            if let Err(e) = self.host.clear_cache().await {
                debug!("clear-cache on view close failed: {e}");
            }
            self.host.caches().clear();
        }
    }
}

async fn poll(
    host: Arc<MediaHost>,
    sink: Arc<dyn ReloadSink>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match host.drain_evictions().await {
                    Ok(addresses) => {
                        if !addresses.is_empty() {
                            debug!(count = addresses.len(), "worker evicted files");
                        }
                        for address in &addresses {
                            sink.mark_not_loaded(address);
                        }
                    }
                    Err(e) => debug!("eviction drain failed: {e}"),
                }
            }
        }
    }
}
