//! Watchlist provider
//!
//! Polls a media-server watchlist feed. Items arrive as guid lists
//! (`imdb://tt...`, `tmdb://...`, `tvdb://...`).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ContentProvider;
use crate::config::ProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::media::{ContentItem, ItemKind};
use crate::services::rate_limiter::RateLimitedClient;

#[derive(Debug, Deserialize)]
struct WatchlistFeed {
    #[serde(default)]
    items: Vec<WatchlistEntry>,
}

#[derive(Debug, Deserialize)]
struct WatchlistEntry {
    #[serde(rename = "type")]
    media_type: Option<String>,
    #[serde(default)]
    guids: Vec<String>,
}

/// Split a `scheme://value` guid into its parts.
fn parse_guid(guid: &str) -> Option<(&str, &str)> {
    guid.split_once("://")
}

pub struct WatchlistProvider {
    http: RateLimitedClient,
    settings: ProviderSettings,
}

impl WatchlistProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_content("watchlist"),
            settings,
        }
    }
}

#[async_trait]
impl ContentProvider for WatchlistProvider {
    fn key(&self) -> &'static str {
        "Watchlist"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn validate(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if self.settings.url.is_empty() {
            warn!("Watchlist enabled but no feed url configured");
            return false;
        }
        true
    }

    async fn run(&self) -> CoreResult<Vec<ContentItem>> {
        let response = self
            .http
            .get(&self.settings.url, &[("Accept", "application/json")])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("watchlist: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "watchlist"));
        }

        let feed: WatchlistFeed = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("watchlist decode: {e}")))?;

        let items: Vec<ContentItem> = feed
            .items
            .into_iter()
            .filter_map(|entry| {
                let mut item = ContentItem {
                    kind: entry.media_type.as_deref().and_then(|t| match t {
                        "movie" => Some(ItemKind::Movie),
                        "show" | "tv" => Some(ItemKind::Show),
                        _ => None,
                    }),
                    requested_by: "watchlist".to_string(),
                    ..ContentItem::default()
                };
                for guid in &entry.guids {
                    match parse_guid(guid) {
                        Some(("imdb", id)) => item.imdb_id = Some(id.to_string()),
                        Some(("tmdb", id)) => item.tmdb_id = Some(id.to_string()),
                        Some(("tvdb", id)) => item.tvdb_id = Some(id.to_string()),
                        _ => {}
                    }
                }
                item.has_any_id().then_some(item)
            })
            .collect();

        debug!(count = items.len(), "Watchlist poll finished");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guids_split_on_scheme() {
        assert_eq!(parse_guid("imdb://tt0133093"), Some(("imdb", "tt0133093")));
        assert_eq!(parse_guid("tvdb://81189"), Some(("tvdb", "81189")));
        assert_eq!(parse_guid("plain"), None);
    }
}
