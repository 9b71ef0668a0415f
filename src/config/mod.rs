//! Application configuration
//!
//! Two layers, mirroring how the service boots: `Config` is the env-driven
//! bootstrap (database URL, data dir) read before anything else exists, and
//! `SettingsManager` is the persisted settings tree that the rest of the
//! system reads concurrently and the CLI mutates by dotted path. Mutating
//! the tree re-initializes dependent services through
//! `Program::reinitialize`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::CoreError;

/// Bootstrap configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,

    /// Root for settings, cache and snapshots.
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let data_dir = env::var("CURATOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .map(|d| d.join("curator"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        Ok(Self {
            database_url,
            data_dir,
        })
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("logs").join("curator.log")
    }
}

/// Per-provider debrid credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebridProviderSettings {
    pub enabled: bool,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    pub real_debrid: DebridProviderSettings,
    pub tor_box: DebridProviderSettings,
    pub all_debrid: DebridProviderSettings,
    /// Minimum accepted size for a movie video file.
    pub movie_min_bytes: i64,
    /// Minimum accepted size for an episode video file.
    pub episode_min_bytes: i64,
    pub video_extensions: Vec<String>,
    /// Seconds a host's circuit stays open after repeated 5xx/429.
    pub circuit_cooloff_secs: u64,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            real_debrid: DebridProviderSettings::default(),
            tor_box: DebridProviderSettings::default(),
            all_debrid: DebridProviderSettings::default(),
            movie_min_bytes: 200_000_000,
            episode_min_bytes: 40_000_000,
            video_extensions: vec!["mkv".into(), "mp4".into(), "avi".into()],
            circuit_cooloff_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingSettings {
    pub aggregator_url: String,
    pub aggregator_api_key: String,
    /// Hard cap on scrape attempts per item.
    pub max_attempts: u32,
    /// Base of the exponential backoff window between attempts.
    pub backoff_base_secs: u64,
    pub indexer_timeout_secs: u64,
    pub total_budget_secs: u64,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self {
            aggregator_url: String::new(),
            aggregator_api_key: String::new(),
            max_attempts: 5,
            backoff_base_secs: 1800,
            indexer_timeout_secs: 15,
            total_budget_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub tmdb_api_key: String,
    pub tvdb_api_key: String,
    /// Minutes after air time before a release task fires.
    pub schedule_offset_minutes: i64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            tmdb_api_key: String::new(),
            tvdb_api_key: String::new(),
            schedule_offset_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymlinkSettings {
    /// Root of the symlink library the media server watches.
    pub library_path: PathBuf,
    /// Debrid provider mount to resolve sources in.
    pub mount_path: PathBuf,
    pub separate_anime_dirs: bool,
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for SymlinkSettings {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("/library"),
            mount_path: PathBuf::from("/mnt/debrid"),
            separate_anime_dirs: false,
            batch_size: 50,
            max_workers: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterSettings {
    pub library_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleSettings {
    pub enabled: bool,
    pub languages: Vec<String>,
    pub provider_url: String,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            languages: vec!["en".into()],
            provider_url: String::new(),
        }
    }
}

/// One content provider's polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
    /// Seconds between polls.
    pub update_interval: u64,
    /// When true the provider is polled once at startup instead of on an
    /// interval (pushes arrive out of band).
    pub use_webhook: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            update_interval: 900,
            use_webhook: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
    pub request_inbox: ProviderSettings,
    pub watchlist: ProviderSettings,
    pub lists: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Paste service that receives `logs upload`; POSTed the raw log text,
    /// expected to answer with a URL.
    pub paste_url: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            paste_url: "https://paste.c-net.org".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_size_bytes: u64,
    pub ttl_seconds: u64,
    /// "LRU" or "TTL".
    pub eviction: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            ttl_seconds: 2 * 60 * 60,
            eviction: "LRU".into(),
        }
    }
}

/// The persisted settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Seconds between retry-library sweeps; 0 disables the sweep.
    pub retry_interval: u64,
    pub indexer: IndexerSettings,
    pub scraping: ScrapingSettings,
    pub downloader: DownloaderSettings,
    pub symlink: SymlinkSettings,
    pub updater: UpdaterSettings,
    pub subtitles: SubtitleSettings,
    pub content: ContentSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
    pub api_key: String,
}

impl AppSettings {
    /// Startup validation. Failures here are fatal.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cache.eviction != "LRU" && self.cache.eviction != "TTL" {
            return Err(CoreError::ConfigInvalid(format!(
                "cache.eviction must be LRU or TTL, got {:?}",
                self.cache.eviction
            )));
        }
        if self.cache.max_size_bytes == 0 {
            return Err(CoreError::ConfigInvalid(
                "cache.max_size_bytes must be nonzero".into(),
            ));
        }
        if self.scraping.max_attempts == 0 {
            return Err(CoreError::ConfigInvalid(
                "scraping.max_attempts must be nonzero".into(),
            ));
        }
        if self.symlink.batch_size == 0 || self.symlink.max_workers == 0 {
            return Err(CoreError::ConfigInvalid(
                "symlink.batch_size and symlink.max_workers must be nonzero".into(),
            ));
        }
        for (name, value) in [
            ("scraping.aggregator_url", &self.scraping.aggregator_url),
            ("updater.library_url", &self.updater.library_url),
            ("content.request_inbox.url", &self.content.request_inbox.url),
            ("content.watchlist.url", &self.content.watchlist.url),
            ("content.lists.url", &self.content.lists.url),
            ("logging.paste_url", &self.logging.paste_url),
        ] {
            if !value.is_empty() && url::Url::parse(value).is_err() {
                return Err(CoreError::ConfigInvalid(format!("{name} is not a valid URL")));
            }
        }
        Ok(())
    }
}

/// Owns the settings tree. Reads are concurrent; writes go through the
/// dotted-path API and are persisted on `save`.
pub struct SettingsManager {
    path: PathBuf,
    current: RwLock<AppSettings>,
}

impl SettingsManager {
    /// Load settings from disk, writing defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing settings file {}", path.display()))?
        } else {
            info!(path = %path.display(), "Settings file not found, creating defaults");
            let defaults = AppSettings::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&defaults)?)?;
            defaults
        };

        Ok(Self {
            path: path.to_path_buf(),
            current: RwLock::new(settings),
        })
    }

    pub fn get(&self) -> AppSettings {
        self.current.read().clone()
    }

    /// Read a value by dotted path, e.g. `downloader.movie_min_bytes`.
    /// The special path `all` returns the whole tree.
    pub fn get_path(&self, dotted: &str) -> Option<Value> {
        let tree = serde_json::to_value(&*self.current.read()).ok()?;
        if dotted == "all" {
            return Some(tree);
        }
        let mut node = &tree;
        for part in dotted.split('.') {
            node = node.get(part)?;
        }
        Some(node.clone())
    }

    /// Set a value by dotted path. The new tree must still deserialize into
    /// a valid `AppSettings`.
    pub fn set_path(&self, dotted: &str, value: Value) -> Result<()> {
        let mut tree = serde_json::to_value(&*self.current.read())?;

        let mut node = &mut tree;
        let parts: Vec<&str> = dotted.split('.').collect();
        let (last, parents) = parts
            .split_last()
            .context("settings path must be non-empty")?;
        for part in parents {
            node = node
                .get_mut(*part)
                .with_context(|| format!("unknown settings path: {dotted}"))?;
        }
        let slot = node
            .get_mut(*last)
            .with_context(|| format!("unknown settings path: {dotted}"))?;
        *slot = value;

        let parsed: AppSettings =
            serde_json::from_value(tree).context("new value does not fit the settings schema")?;
        parsed.validate()?;
        *self.current.write() = parsed;
        Ok(())
    }

    /// Reload from disk, discarding in-memory changes.
    pub fn load(&self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading settings file {}", self.path.display()))?;
        let parsed: AppSettings = serde_json::from_str(&raw)?;
        parsed.validate()?;
        *self.current.write() = parsed;
        Ok(())
    }

    /// Persist the current tree to disk.
    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&*self.current.read())?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing settings file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn manager() -> (tempfile::TempDir, SettingsManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::load_or_default(&dir.path().join("settings.json")).unwrap();
        (dir, manager)
    }

    #[test]
    fn dotted_path_roundtrip() {
        let (_dir, manager) = manager();
        manager
            .set_path("downloader.movie_min_bytes", serde_json::json!(123))
            .unwrap();
        assert_eq!(
            manager.get_path("downloader.movie_min_bytes").unwrap(),
            serde_json::json!(123)
        );
        assert_eq!(manager.get().downloader.movie_min_bytes, 123);
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let (_dir, manager) = manager();
        assert!(
            manager
                .set_path("no.such.path", serde_json::json!(1))
                .is_err()
        );
        assert!(manager.get_path("no.such.path").is_none());
    }

    #[test]
    fn invalid_values_do_not_stick() {
        let (_dir, manager) = manager();
        assert!(
            manager
                .set_path("cache.eviction", serde_json::json!("FIFO"))
                .is_err()
        );
        assert_eq!(manager.get().cache.eviction, "LRU");
    }

    #[test]
    fn save_and_reload() {
        let (_dir, manager) = manager();
        manager
            .set_path("retry_interval", serde_json::json!(3600))
            .unwrap();
        manager.save().unwrap();
        manager
            .set_path("retry_interval", serde_json::json!(0))
            .unwrap();
        manager.load().unwrap();
        assert_eq!(manager.get().retry_interval, 3600);
    }
}
