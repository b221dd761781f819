use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::MediaKind;

const MIB: u64 = 1024 * 1024;

/// Top-level configuration (loaded from keepsake.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepsakeConfig {
    pub archive: ArchiveConfig,
    pub keychain: KeychainConfig,
    pub worker: WorkerConfig,
    pub host: HostConfig,
    pub log: LogConfig,
}

impl KeepsakeConfig {
    /// Load from `path`; a missing file yields defaults with a warning.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive root holding attachments/, thumbs/ and previews/
    pub dir: PathBuf,
}

impl ArchiveConfig {
    /// `dir` with a leading `~/` expanded against `$HOME`
    pub fn root(&self) -> PathBuf {
        expand_tilde(&self.dir)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root().join("attachments")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.root().join("thumbs")
    }

    /// Worker-owned scratch space for decrypted session files
    pub fn session_media_dir(&self) -> PathBuf {
        self.root().join("previews").join("session").join("media")
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

/// OS credential store entry holding the archive master key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeychainConfig {
    pub service: String,
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Count bound on decrypted session files (default: 20)
    pub max_cached_files: usize,
    /// Idle time after which a session file is evicted (default: 300)
    pub idle_ttl_secs: u64,
    /// How often the idle sweep runs between commands (default: 30)
    pub sweep_interval_secs: u64,
    /// Plaintext size at which media-path switches to parallel decrypt (default: 10 MiB)
    pub parallel_decrypt_threshold_bytes: u64,
    /// Thread count of the parallel decrypt pool (default: 4)
    pub parallel_decrypt_workers: usize,
    /// Largest plaintext the thumbnailer will decode in memory (default: 64 MiB)
    pub max_image_decode_bytes: u64,
    /// JPEG quality of derived thumbnails (default: 80)
    pub thumbnail_quality: u8,
    /// Plaintext ceilings for data-url, per media kind
    pub data_url_max_image_bytes: u64,
    pub data_url_max_audio_bytes: u64,
    pub data_url_max_video_bytes: u64,
    pub data_url_max_other_bytes: u64,
}

impl WorkerConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn data_url_ceiling(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.data_url_max_image_bytes,
            MediaKind::Audio => self.data_url_max_audio_bytes,
            MediaKind::Video => self.data_url_max_video_bytes,
            MediaKind::Other => self.data_url_max_other_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Path to the worker executable (default: `keepsake-worker` next to the host binary)
    pub worker_program: Option<PathBuf>,
    pub inline_cache_entries: usize,
    pub path_cache_entries: usize,
    /// Byte budget of the thumbnail tier (default: 32 MiB)
    pub thumbnail_cache_bytes: u64,
    /// Eviction drain interval while a media view is visible (default: 2000)
    pub eviction_poll_ms: u64,
    pub quick_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub thumbnail_timeout_ms: u64,
    pub media_timeout_ms: u64,
}

impl HostConfig {
    pub fn eviction_poll_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/keepsake"),
        }
    }
}

impl Default for KeychainConfig {
    fn default() -> Self {
        Self {
            service: "keepsake".into(),
            account: "archive-master-key".into(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_cached_files: 20,
            idle_ttl_secs: 300,
            sweep_interval_secs: 30,
            parallel_decrypt_threshold_bytes: 10 * MIB,
            parallel_decrypt_workers: 4,
            max_image_decode_bytes: 64 * MIB,
            thumbnail_quality: 80,
            data_url_max_image_bytes: 12 * MIB,
            data_url_max_audio_bytes: 25 * MIB,
            data_url_max_video_bytes: 35 * MIB,
            data_url_max_other_bytes: 12 * MIB,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker_program: None,
            inline_cache_entries: 64,
            path_cache_entries: 128,
            thumbnail_cache_bytes: 32 * MIB,
            eviction_poll_ms: 2000,
            quick_timeout_ms: 5_000,
            shutdown_timeout_ms: 2_000,
            thumbnail_timeout_ms: 15_000,
            media_timeout_ms: 120_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
