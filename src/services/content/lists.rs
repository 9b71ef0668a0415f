//! List sync provider
//!
//! Polls an mdblist-style curated list API for movies and shows.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ContentProvider;
use crate::config::ProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::media::{ContentItem, ItemKind};
use crate::services::rate_limiter::RateLimitedClient;

#[derive(Debug, Deserialize)]
struct ListItems {
    #[serde(default)]
    movies: Vec<ListEntry>,
    #[serde(default)]
    shows: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    imdb_id: Option<String>,
    tvdb_id: Option<i64>,
    tmdb_id: Option<i64>,
}

impl ListEntry {
    fn into_content(self, kind: ItemKind) -> Option<ContentItem> {
        let item = ContentItem {
            imdb_id: self.imdb_id,
            tmdb_id: self.tmdb_id.map(|id| id.to_string()),
            tvdb_id: self.tvdb_id.map(|id| id.to_string()),
            kind: Some(kind),
            requested_by: "lists".to_string(),
        };
        item.has_any_id().then_some(item)
    }
}

pub struct ListSyncProvider {
    http: RateLimitedClient,
    settings: ProviderSettings,
}

impl ListSyncProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_content("lists"),
            settings,
        }
    }
}

#[async_trait]
impl ContentProvider for ListSyncProvider {
    fn key(&self) -> &'static str {
        "ListSync"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn validate(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if self.settings.url.is_empty() || self.settings.api_key.is_empty() {
            warn!("List sync enabled but url/api key missing");
            return false;
        }
        true
    }

    async fn run(&self) -> CoreResult<Vec<ContentItem>> {
        let url = format!("{}/items", self.settings.url.trim_end_matches('/'));
        let response = self
            .http
            .get_with_query(&url, &[], &[("apikey", self.settings.api_key.as_str())])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("lists: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "lists"));
        }

        let list: ListItems = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("lists decode: {e}")))?;

        let items: Vec<ContentItem> = list
            .movies
            .into_iter()
            .filter_map(|e| e.into_content(ItemKind::Movie))
            .chain(
                list.shows
                    .into_iter()
                    .filter_map(|e| e.into_content(ItemKind::Show)),
            )
            .collect();

        debug!(count = items.len(), "List sync poll finished");
        Ok(items)
    }
}
