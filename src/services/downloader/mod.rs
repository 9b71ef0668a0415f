//! Downloader service
//!
//! Talks to a debrid provider: checks instant availability for candidate
//! infohashes, adds cached magnets, selects the wanted video files and
//! records the resolved paths on the item. Hashes that are cached but do
//! not yield a usable file set are blacklisted so they are never retried.

pub mod alldebrid;
pub mod realdebrid;
pub mod torbox;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkerOutput;
use super::rate_limiter::CircuitBreaker;
use crate::config::DownloaderSettings;
use crate::db::Database;
use crate::error::CoreResult;
use crate::media::item::ActiveFile;
use crate::media::{ActiveStream, ItemKind};

/// A file inside a cached container, as reported by availability checks.
#[derive(Debug, Clone)]
pub struct ContainerFile {
    pub file_id: i64,
    pub filename: String,
    pub filesize: i64,
}

/// One way a hash is cached: a set of files that can be selected together.
pub type Container = Vec<ContainerFile>;

#[derive(Debug, Clone)]
pub struct TorrentFile {
    pub file_id: i64,
    pub path: String,
    pub bytes: i64,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub id: String,
    pub hash: String,
    pub status: String,
    pub original_filename: Option<String>,
    pub filename: Option<String>,
    pub files: Vec<TorrentFile>,
}

/// The debrid API surface the orchestrator consumes.
#[async_trait]
pub trait DebridClient: Send + Sync {
    fn name(&self) -> &'static str;
    /// Host key for the circuit breaker.
    fn host(&self) -> &str;
    /// Check credentials and account standing.
    async fn validate(&self) -> bool;
    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> CoreResult<HashMap<String, Vec<Container>>>;
    async fn add_magnet(&self, infohash: &str) -> CoreResult<String>;
    async fn select_files(&self, torrent_id: &str, file_ids: &[i64]) -> CoreResult<()>;
    async fn get_torrent_info(&self, torrent_id: &str) -> CoreResult<TorrentInfo>;
    async fn get_torrents(&self, limit: usize) -> CoreResult<HashMap<String, TorrentInfo>>;
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(&filename.to_ascii_lowercase())
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
}

/// Pick the video files worth keeping from a container: whitelisted
/// extensions and a per-kind size floor. Movies keep the single largest
/// file; show items keep every match.
pub fn select_video_files(
    container: &[ContainerFile],
    kind: ItemKind,
    settings: &DownloaderSettings,
) -> Vec<ContainerFile> {
    let min_bytes = match kind {
        ItemKind::Movie => settings.movie_min_bytes,
        _ => settings.episode_min_bytes,
    };

    let mut wanted: Vec<ContainerFile> = container
        .iter()
        .filter(|f| f.filesize >= min_bytes)
        .filter(|f| {
            extension_of(&f.filename)
                .is_some_and(|ext| settings.video_extensions.iter().any(|w| *w == ext))
        })
        .cloned()
        .collect();

    if kind == ItemKind::Movie && wanted.len() > 1 {
        wanted.sort_by_key(|f| std::cmp::Reverse(f.filesize));
        wanted.truncate(1);
    }
    wanted
}

/// The downloader worker. The first provider of the ordered list that
/// validates at startup becomes the active one.
pub struct DownloaderService {
    active: Option<Arc<dyn DebridClient>>,
    breaker: CircuitBreaker,
    db: Database,
    settings: DownloaderSettings,
}

impl DownloaderService {
    /// Build and elect a provider. Order is fixed: RealDebrid, TorBox,
    /// AllDebrid.
    pub async fn new(db: Database, settings: DownloaderSettings) -> Self {
        let candidates: Vec<Arc<dyn DebridClient>> = vec![
            Arc::new(realdebrid::RealDebridClient::new(&settings.real_debrid)),
            Arc::new(torbox::TorBoxClient::new(&settings.tor_box)),
            Arc::new(alldebrid::AllDebridClient::new(&settings.all_debrid)),
        ];

        let mut active = None;
        for candidate in candidates {
            if candidate.validate().await {
                info!(provider = candidate.name(), "Downloader provider initialized");
                active = Some(candidate);
                break;
            }
        }
        if active.is_none() {
            warn!("No downloader provider validated; downloads are disabled");
        }

        let breaker = CircuitBreaker::new(3, Duration::from_secs(settings.circuit_cooloff_secs));
        Self {
            active,
            breaker,
            db,
            settings,
        }
    }

    pub fn initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn provider_name(&self) -> Option<&'static str> {
        self.active.as_ref().map(|p| p.name())
    }

    /// Resolve an item's best cached stream into concrete files.
    ///
    /// Walks candidates in rank order. Uncached hashes are skipped (they
    /// may cache later); cached hashes without a usable file set are
    /// blacklisted.
    pub async fn run_for_item(
        &self,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<WorkerOutput>> {
        let Some(client) = &self.active else {
            debug!(item_id, "No active downloader provider");
            return Ok(Vec::new());
        };

        let repo = self.db.media_items();
        let Some(record) = repo.get_by_id(item_id).await? else {
            warn!(item_id, "Download target vanished");
            return Ok(Vec::new());
        };
        let streams = self.db.streams();
        let candidates = streams.candidates_for(item_id).await?;
        if candidates.is_empty() {
            debug!(item_id, "No candidate streams to download");
            return Ok(Vec::new());
        }

        for stream in candidates {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            if !self.breaker.allows(client.host()) {
                debug!(host = client.host(), "Downloader circuit open, deferring");
                return Ok(Vec::new());
            }

            let availability = match client
                .instant_availability(std::slice::from_ref(&stream.infohash))
                .await
            {
                Ok(availability) => {
                    self.breaker.record_success(client.host());
                    availability
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure(client.host());
                    warn!(item_id, error = %e, "Availability check failed");
                    continue;
                }
                Err(e) => {
                    warn!(item_id, error = %e, "Availability check rejected");
                    continue;
                }
            };

            let containers = availability.get(&stream.infohash).cloned().unwrap_or_default();
            if containers.is_empty() {
                debug!(item_id, hash = %stream.infohash, "Hash not cached, skipping");
                continue;
            }

            let wanted = containers
                .iter()
                .map(|c| select_video_files(c, record.kind(), &self.settings))
                .find(|w| !w.is_empty());

            let Some(wanted) = wanted else {
                info!(item_id, hash = %stream.infohash, "Cached but no wanted files, blacklisting");
                streams.blacklist_hash(item_id, &stream.infohash).await?;
                continue;
            };

            match self.resolve(client.as_ref(), &stream.infohash, &wanted).await {
                Ok(active) => {
                    repo.set_active_stream(item_id, &active).await?;
                    repo.update_ancestor_states(item_id).await?;
                    info!(
                        item_id,
                        hash = %stream.infohash,
                        files = active.files.len(),
                        "Downloaded {}",
                        record.log_label()
                    );
                    return Ok(vec![WorkerOutput::item(item_id)]);
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure(client.host());
                    warn!(item_id, error = %e, "Resolve failed, will retry later");
                    return Ok(Vec::new());
                }
                Err(e) => {
                    warn!(item_id, hash = %stream.infohash, error = %e, "Resolve rejected, blacklisting");
                    streams.blacklist_hash(item_id, &stream.infohash).await?;
                }
            }
        }

        debug!(item_id, "No candidate resolved");
        Ok(Vec::new())
    }

    /// Add the magnet, select the wanted files, and read back the resolved
    /// paths.
    async fn resolve(
        &self,
        client: &dyn DebridClient,
        infohash: &str,
        wanted: &[ContainerFile],
    ) -> CoreResult<ActiveStream> {
        let torrent_id = client.add_magnet(infohash).await?;
        let file_ids: Vec<i64> = wanted.iter().map(|f| f.file_id).collect();
        client.select_files(&torrent_id, &file_ids).await?;
        let torrent = client.get_torrent_info(&torrent_id).await?;

        let files: Vec<ActiveFile> = torrent
            .files
            .iter()
            .filter(|f| f.selected)
            .map(|f| ActiveFile {
                path: f.path.clone(),
                file_size: f.bytes,
            })
            .collect();

        if files.is_empty() {
            return Err(crate::error::CoreError::ExternalPermanent(format!(
                "torrent {torrent_id} resolved no selected files"
            )));
        }

        Ok(ActiveStream {
            infohash: infohash.to_string(),
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: i64, name: &str, size: i64) -> ContainerFile {
        ContainerFile {
            file_id: id,
            filename: name.to_string(),
            filesize: size,
        }
    }

    fn settings() -> DownloaderSettings {
        DownloaderSettings::default()
    }

    #[test]
    fn movies_keep_the_single_largest_video() {
        let container = vec![
            file(1, "Movie.2160p.mkv", 4_000_000_000),
            file(2, "Movie.1080p.mkv", 2_000_000_000),
            file(3, "sample.mkv", 50_000_000),
            file(4, "cover.jpg", 500_000),
        ];
        let wanted = select_video_files(&container, ItemKind::Movie, &settings());
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].file_id, 1);
    }

    #[test]
    fn episodes_keep_every_match_over_the_floor() {
        let container = vec![
            file(1, "S01E01.mkv", 700_000_000),
            file(2, "S01E02.mkv", 700_000_000),
            file(3, "S01E03.avi", 35_000_000),
            file(4, "readme.txt", 1_000),
        ];
        let wanted = select_video_files(&container, ItemKind::Season, &settings());
        assert_eq!(wanted.len(), 2);
    }

    #[test]
    fn size_floors_are_per_kind() {
        let container = vec![file(1, "small.mkv", 100_000_000)];
        assert!(select_video_files(&container, ItemKind::Movie, &settings()).is_empty());
        assert_eq!(
            select_video_files(&container, ItemKind::Episode, &settings()).len(),
            1
        );
    }

    #[test]
    fn extension_whitelist_is_case_insensitive() {
        let container = vec![file(1, "Movie.MKV", 2_000_000_000)];
        assert_eq!(
            select_video_files(&container, ItemKind::Movie, &settings()).len(),
            1
        );
        let container = vec![file(1, "Movie.iso", 2_000_000_000)];
        assert!(select_video_files(&container, ItemKind::Movie, &settings()).is_empty());
    }
}
