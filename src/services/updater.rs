//! Updater service
//!
//! Tells the media library server to rescan the paths the symlinker just
//! populated, then marks the affected items Completed.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkerOutput;
use super::rate_limiter::RateLimitedClient;
use crate::config::UpdaterSettings;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::media::{ItemKind, MediaState};

/// The media library server surface the orchestrator consumes.
#[async_trait]
pub trait LibraryNotifier: Send + Sync {
    async fn refresh_path(&self, path: &str) -> CoreResult<bool>;
}

/// Plex-style section refresh over HTTP.
pub struct HttpLibraryNotifier {
    http: RateLimitedClient,
    settings: UpdaterSettings,
}

impl HttpLibraryNotifier {
    pub fn new(settings: UpdaterSettings) -> Self {
        Self {
            http: RateLimitedClient::for_library(),
            settings,
        }
    }

    pub fn initialized(&self) -> bool {
        !self.settings.library_url.is_empty()
    }
}

#[async_trait]
impl LibraryNotifier for HttpLibraryNotifier {
    async fn refresh_path(&self, path: &str) -> CoreResult<bool> {
        let url = format!(
            "{}/library/sections/all/refresh",
            self.settings.library_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get_with_query(
                &url,
                &[("X-Plex-Token", self.settings.token.as_str())],
                &[("path", path)],
            )
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("library refresh: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "library refresh"));
        }
        Ok(true)
    }
}

/// The updater worker.
pub struct UpdaterService {
    notifier: Box<dyn LibraryNotifier>,
    db: Database,
    initialized: bool,
}

impl UpdaterService {
    pub fn new(db: Database, settings: UpdaterSettings) -> Self {
        let notifier = HttpLibraryNotifier::new(settings);
        let initialized = notifier.initialized();
        Self {
            notifier: Box::new(notifier),
            db,
            initialized,
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Refresh each library folder the item's entries live in (each folder
    /// once), then complete the symlinked leaves.
    pub async fn run_for_item(
        &self,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkerOutput>> {
        let repo = self.db.media_items();
        let Some(record) = repo.get_by_id(item_id).await? else {
            warn!(item_id, "Update target vanished");
            return Ok(Vec::new());
        };

        let (self_id, descendants) = repo.get_item_ids(item_id).await?;
        let mut ids = vec![self_id];
        ids.extend(descendants);

        let entries_repo = self.db.filesystem_entries();
        let mut folders: BTreeSet<String> = BTreeSet::new();
        let mut to_complete: Vec<i64> = Vec::new();

        for id in &ids {
            let Some(item) = repo.get_by_id(*id).await? else {
                continue;
            };
            if item.state() != MediaState::Symlinked {
                continue;
            }
            for entry in entries_repo.for_item(*id).await? {
                if let Some(parent) = Path::new(&entry.path).parent() {
                    folders.insert(parent.to_string_lossy().into_owned());
                }
            }
            to_complete.push(*id);
        }

        if to_complete.is_empty() {
            debug!(item_id, "Nothing symlinked to update");
            return Ok(Vec::new());
        }

        for folder in &folders {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            match self.notifier.refresh_path(folder).await {
                Ok(_) => debug!(folder = %folder, "Library refreshed"),
                Err(e) if e.is_transient() => {
                    warn!(folder = %folder, error = %e, "Library refresh failed, will retry");
                    return Ok(Vec::new());
                }
                Err(e) => warn!(folder = %folder, error = %e, "Library refresh rejected"),
            }
        }

        for id in &to_complete {
            repo.set_state(*id, MediaState::Completed).await?;
        }
        if matches!(record.kind(), ItemKind::Show | ItemKind::Season) {
            repo.store_state(item_id).await?;
        }
        repo.update_ancestor_states(item_id).await?;

        if matches!(record.kind(), ItemKind::Movie | ItemKind::Show) {
            info!(item_id, "Item has been completed: {}", record.log_label());
        }
        Ok(vec![WorkerOutput::item(item_id)])
    }
}
