//! Symlinker service
//!
//! Exposes resolved debrid files to the media server by linking them into a
//! typed library tree (`movies`, `shows`, `anime_movies`, `anime_shows`).
//! Items are processed in fixed-size batches over a small worker pool, and
//! source-path resolutions plus created folders are cached with a bounded
//! FIFO to amortize filesystem syscalls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::WorkerOutput;
use crate::config::SymlinkSettings;
use crate::db::{Database, MediaItemRecord};
use crate::media::{ItemKind, MediaState};

const PATH_CACHE_LIMIT: usize = 1024;
const FOLDER_CACHE_LIMIT: usize = 512;

/// Bounded FIFO map for filename → resolved source path.
#[derive(Debug, Default)]
struct PathCache {
    map: HashMap<String, PathBuf>,
    order: VecDeque<String>,
}

impl PathCache {
    fn get(&self, key: &str) -> Option<PathBuf> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: PathBuf) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
            while self.order.len() > PATH_CACHE_LIMIT {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }
}

/// Bounded FIFO set of folders already created this run.
#[derive(Debug, Default)]
struct FolderCache {
    set: HashSet<PathBuf>,
    order: VecDeque<PathBuf>,
}

impl FolderCache {
    fn contains(&self, path: &Path) -> bool {
        self.set.contains(path)
    }

    fn insert(&mut self, path: PathBuf) {
        if self.set.insert(path.clone()) {
            self.order.push_back(path);
            while self.order.len() > FOLDER_CACHE_LIMIT {
                if let Some(evicted) = self.order.pop_front() {
                    self.set.remove(&evicted);
                }
            }
        }
    }
}

/// Library folder name: `Title (Year) {imdb-ttXXXXXXX}`.
pub fn library_folder_name(
    title: Option<&str>,
    year: Option<i32>,
    imdb_id: Option<&str>,
) -> String {
    let mut name = title.unwrap_or("Unknown").to_string();
    if let Some(year) = year {
        name.push_str(&format!(" ({year})"));
    }
    if let Some(imdb) = imdb_id {
        name.push_str(&format!(" {{imdb-{imdb}}}"));
    }
    sanitize_filename::sanitize(name)
}

/// Episode file stem: `Title (Year) - sNNeMM`.
pub fn episode_file_stem(
    show_title: Option<&str>,
    show_year: Option<i32>,
    season: i32,
    episode: i32,
) -> String {
    let mut stem = show_title.unwrap_or("Unknown").to_string();
    if let Some(year) = show_year {
        stem.push_str(&format!(" ({year})"));
    }
    stem.push_str(&format!(" - s{season:02}e{episode:02}"));
    sanitize_filename::sanitize(stem)
}

/// One prepared link operation.
#[derive(Debug, Clone)]
struct PlannedLink {
    item_id: i64,
    source: PathBuf,
    destination: PathBuf,
    file_size: i64,
}

pub struct SymlinkerService {
    db: Database,
    settings: SymlinkSettings,
    path_cache: Mutex<PathCache>,
    folder_cache: Mutex<FolderCache>,
    initialized: bool,
}

impl SymlinkerService {
    pub fn new(db: Database, settings: SymlinkSettings) -> Self {
        let initialized = Self::create_initial_folders(&settings)
            .map_err(|e| warn!(error = %e, "Symlink library folders unavailable"))
            .is_ok();
        Self {
            db,
            settings,
            path_cache: Mutex::new(PathCache::default()),
            folder_cache: Mutex::new(FolderCache::default()),
            initialized,
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    fn create_initial_folders(settings: &SymlinkSettings) -> Result<()> {
        for sub in ["movies", "shows", "anime_movies", "anime_shows"] {
            std::fs::create_dir_all(settings.library_path.join(sub))
                .with_context(|| format!("creating library folder {sub}"))?;
        }
        Ok(())
    }

    /// Link every resolved file of an item (or its episodes) into the
    /// library, then advance state and refresh ancestors.
    pub async fn run_for_item(
        self: &Arc<Self>,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkerOutput>> {
        let repo = self.db.media_items();
        let Some(record) = repo.get_by_id(item_id).await? else {
            warn!(item_id, "Symlink target vanished");
            return Ok(Vec::new());
        };

        let leaves = self.leaves_to_link(&record).await?;
        if leaves.is_empty() {
            debug!(item_id, "Nothing to symlink");
            return Ok(Vec::new());
        }

        let mut planned = Vec::new();
        for leaf in &leaves {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            match self.prepare(leaf).await {
                Ok(Some(link)) => planned.push(link),
                Ok(None) => debug!(item_id = leaf.id, "Source not present yet, skipping"),
                Err(e) => warn!(item_id = leaf.id, error = %e, "Could not prepare symlink"),
            }
        }
        if planned.is_empty() {
            return Ok(Vec::new());
        }

        let linked = self.link_batches(planned, cancel).await;
        if linked == 0 {
            return Ok(Vec::new());
        }

        if matches!(record.kind(), ItemKind::Show | ItemKind::Season) {
            repo.store_state(item_id).await?;
        }
        repo.update_ancestor_states(item_id).await?;

        info!(item_id, linked, "Symlinked {}", record.log_label());
        Ok(vec![WorkerOutput::item(item_id)])
    }

    /// Movies and episodes link themselves; shows and seasons link their
    /// downloaded episodes.
    async fn leaves_to_link(&self, record: &MediaItemRecord) -> Result<Vec<MediaItemRecord>> {
        let repo = self.db.media_items();
        match record.kind() {
            ItemKind::Movie | ItemKind::Episode => Ok(vec![record.clone()]),
            ItemKind::Show | ItemKind::Season => {
                let (_, descendants) = repo.get_item_ids(record.id).await?;
                let mut leaves = Vec::new();
                for id in descendants {
                    if let Some(child) = repo.get_by_id(id).await? {
                        if child.kind() == ItemKind::Episode
                            && child.state() == MediaState::Downloaded
                            && child.active_stream().is_some()
                        {
                            leaves.push(child);
                        }
                    }
                }
                Ok(leaves)
            }
        }
    }

    /// Process links in fixed-size batches with a bounded pool per batch.
    async fn link_batches(self: &Arc<Self>, planned: Vec<PlannedLink>, cancel: &CancellationToken) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers));
        let mut linked = 0usize;

        for batch in planned.chunks(self.settings.batch_size) {
            if cancel.is_cancelled() {
                break;
            }
            let mut handles = Vec::with_capacity(batch.len());
            for link in batch.iter().cloned() {
                let semaphore = semaphore.clone();
                let service = Arc::clone(self);
                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return false;
                    };
                    service.create_and_register(link).await
                }));
            }
            for result in futures::future::join_all(handles).await {
                match result {
                    Ok(true) => linked += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Symlink task panicked"),
                }
            }
        }
        linked
    }

    /// Resolve source and destination for one leaf item.
    async fn prepare(&self, record: &MediaItemRecord) -> Result<Option<PlannedLink>> {
        let Some(active) = record.active_stream() else {
            return Ok(None);
        };
        let Some(file) = active.files.first() else {
            return Ok(None);
        };

        let Some(source) = self.resolve_source(&file.path).await else {
            return Ok(None);
        };

        let extension = Path::new(&file.path)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mkv".to_string());

        let destination = match record.kind() {
            ItemKind::Movie => {
                let folder = library_folder_name(
                    record.title.as_deref(),
                    record.year,
                    record.imdb_id.as_deref(),
                );
                let base = if record.is_anime && self.settings.separate_anime_dirs {
                    "anime_movies"
                } else {
                    "movies"
                };
                self.settings
                    .library_path
                    .join(base)
                    .join(&folder)
                    .join(format!("{folder}.{extension}"))
            }
            ItemKind::Episode => {
                let show = self.show_of(record).await?;
                let folder = library_folder_name(
                    show.as_ref().and_then(|s| s.title.as_deref()),
                    show.as_ref().and_then(|s| s.year),
                    show.as_ref().and_then(|s| s.imdb_id.as_deref()),
                );
                let is_anime = show.as_ref().map(|s| s.is_anime).unwrap_or(record.is_anime);
                let base = if is_anime && self.settings.separate_anime_dirs {
                    "anime_shows"
                } else {
                    "shows"
                };
                let season = record.season_number.unwrap_or(1);
                let stem = episode_file_stem(
                    show.as_ref().and_then(|s| s.title.as_deref()),
                    show.as_ref().and_then(|s| s.year),
                    season,
                    record.episode_number.unwrap_or(1),
                );
                self.settings
                    .library_path
                    .join(base)
                    .join(&folder)
                    .join(format!("Season {season:02}"))
                    .join(format!("{stem}.{extension}"))
            }
            other => {
                anyhow::bail!("cannot symlink a {other} directly");
            }
        };

        Ok(Some(PlannedLink {
            item_id: record.id,
            source,
            destination,
            file_size: file.file_size,
        }))
    }

    async fn show_of(&self, episode: &MediaItemRecord) -> Result<Option<MediaItemRecord>> {
        let repo = self.db.media_items();
        let Some(season_id) = episode.parent_id else {
            return Ok(None);
        };
        let Some(season) = repo.get_by_id(season_id).await? else {
            return Ok(None);
        };
        let Some(show_id) = season.parent_id else {
            return Ok(Some(season));
        };
        repo.get_by_id(show_id).await
    }

    /// Find the file inside the debrid mount. The direct join is the common
    /// case; a bounded filename search covers providers that rename the
    /// containing folder, with results cached.
    async fn resolve_source(&self, relative: &str) -> Option<PathBuf> {
        let direct = self.settings.mount_path.join(relative.trim_start_matches('/'));
        if tokio::fs::try_exists(&direct).await.unwrap_or(false) {
            return Some(direct);
        }

        let filename = Path::new(relative).file_name()?.to_string_lossy().into_owned();
        let cached = self.path_cache.lock().get(&filename);
        if let Some(cached) = cached {
            if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
                return Some(cached);
            }
        }

        let mount = self.settings.mount_path.clone();
        let needle = filename.clone();
        let found = tokio::task::spawn_blocking(move || {
            WalkDir::new(&mount)
                .max_depth(3)
                .into_iter()
                .filter_map(|e| e.ok())
                .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == needle)
                .map(|e| e.into_path())
        })
        .await
        .ok()
        .flatten();

        if let Some(path) = &found {
            self.path_cache.lock().insert(filename, path.clone());
        }
        found
    }

    /// Create the link (replacing any stale one), verify it, register the
    /// filesystem entry and advance the item to Symlinked.
    async fn create_and_register(&self, link: PlannedLink) -> bool {
        if let Err(e) = self.create_symlink(&link) {
            warn!(item_id = link.item_id, error = %e, "Symlink failed");
            return false;
        }

        let destination = link.destination.to_string_lossy().into_owned();
        let original = link.source.to_string_lossy().into_owned();
        if let Err(e) = self
            .db
            .filesystem_entries()
            .create_media_entry(link.item_id, &destination, Some(&original), link.file_size)
            .await
        {
            warn!(item_id = link.item_id, error = %e, "Could not register filesystem entry");
            return false;
        }
        if let Err(e) = self
            .db
            .media_items()
            .set_state(link.item_id, MediaState::Symlinked)
            .await
        {
            warn!(item_id = link.item_id, error = %e, "Could not advance item state");
            return false;
        }
        true
    }

    fn create_symlink(&self, link: &PlannedLink) -> Result<()> {
        if let Some(parent) = link.destination.parent() {
            let known = self.folder_cache.lock().contains(parent);
            if !known {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
                self.folder_cache.lock().insert(parent.to_path_buf());
            }
        }

        // Replace any existing link; a stale one may point at a dead mount.
        if std::fs::symlink_metadata(&link.destination).is_ok() {
            std::fs::remove_file(&link.destination)
                .with_context(|| format!("removing stale {}", link.destination.display()))?;
        }

        std::os::unix::fs::symlink(&link.source, &link.destination)
            .with_context(|| format!("linking {}", link.destination.display()))?;

        let target = std::fs::read_link(&link.destination)?;
        if target != link.source {
            anyhow::bail!(
                "verification failed: {} points at {}",
                link.destination.display(),
                target.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_carry_year_and_imdb_tag() {
        assert_eq!(
            library_folder_name(Some("The Matrix"), Some(1999), Some("tt0133093")),
            "The Matrix (1999) {imdb-tt0133093}"
        );
        assert_eq!(library_folder_name(None, None, None), "Unknown");
    }

    #[test]
    fn folder_names_are_sanitized() {
        let name = library_folder_name(Some("What / If: Part 1?"), Some(2021), None);
        assert!(!name.contains('/'));
    }

    #[test]
    fn episode_stems_zero_pad() {
        assert_eq!(
            episode_file_stem(Some("Dark"), Some(2017), 1, 3),
            "Dark (2017) - s01e03"
        );
        assert_eq!(
            episode_file_stem(Some("Dark"), Some(2017), 10, 12),
            "Dark (2017) - s10e12"
        );
    }

    #[test]
    fn path_cache_evicts_fifo() {
        let mut cache = PathCache::default();
        for i in 0..(PATH_CACHE_LIMIT + 10) {
            cache.insert(format!("file-{i}"), PathBuf::from(format!("/mnt/{i}")));
        }
        assert!(cache.get("file-0").is_none());
        assert!(cache.get(&format!("file-{}", PATH_CACHE_LIMIT + 9)).is_some());
        assert!(cache.map.len() <= PATH_CACHE_LIMIT);
    }
}
