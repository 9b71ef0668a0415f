//! Request inbox provider
//!
//! Polls an Overseerr-style request manager for approved requests.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::ContentProvider;
use crate::config::ProviderSettings;
use crate::error::{CoreError, CoreResult};
use crate::media::{ContentItem, ItemKind};
use crate::services::rate_limiter::RateLimitedClient;

#[derive(Debug, Deserialize)]
struct InboxPage {
    #[serde(default)]
    results: Vec<InboxRequest>,
}

#[derive(Debug, Deserialize)]
struct InboxRequest {
    media: InboxMedia,
    #[serde(rename = "requestedBy")]
    requested_by: Option<InboxUser>,
}

#[derive(Debug, Deserialize)]
struct InboxMedia {
    #[serde(rename = "mediaType")]
    media_type: String,
    #[serde(rename = "tmdbId")]
    tmdb_id: Option<i64>,
    #[serde(rename = "tvdbId")]
    tvdb_id: Option<i64>,
    #[serde(rename = "imdbId")]
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboxUser {
    username: Option<String>,
}

pub struct RequestInboxProvider {
    http: RateLimitedClient,
    settings: ProviderSettings,
}

impl RequestInboxProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            http: RateLimitedClient::for_content("request_inbox"),
            settings,
        }
    }
}

#[async_trait]
impl ContentProvider for RequestInboxProvider {
    fn key(&self) -> &'static str {
        "RequestInbox"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn validate(&self) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if self.settings.url.is_empty() || self.settings.api_key.is_empty() {
            warn!("Request inbox enabled but url/api key missing");
            return false;
        }
        let url = format!("{}/api/v1/status", self.settings.url.trim_end_matches('/'));
        match self
            .http
            .get(&url, &[("X-Api-Key", self.settings.api_key.as_str())])
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Request inbox unreachable");
                false
            }
        }
    }

    async fn run(&self) -> CoreResult<Vec<ContentItem>> {
        let url = format!("{}/api/v1/request", self.settings.url.trim_end_matches('/'));
        let response = self
            .http
            .get_with_query(
                &url,
                &[("X-Api-Key", self.settings.api_key.as_str())],
                &[("take", "100"), ("filter", "approved"), ("sort", "added")],
            )
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("request inbox: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "request inbox"));
        }

        let page: InboxPage = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("request inbox decode: {e}")))?;

        let items: Vec<ContentItem> = page
            .results
            .into_iter()
            .filter_map(|request| {
                let kind = match request.media.media_type.as_str() {
                    "movie" => ItemKind::Movie,
                    "tv" => ItemKind::Show,
                    other => {
                        debug!(media_type = other, "Ignoring unsupported request type");
                        return None;
                    }
                };
                let item = ContentItem {
                    imdb_id: request.media.imdb_id,
                    tmdb_id: request.media.tmdb_id.map(|id| id.to_string()),
                    tvdb_id: request.media.tvdb_id.map(|id| id.to_string()),
                    kind: Some(kind),
                    requested_by: request
                        .requested_by
                        .and_then(|u| u.username)
                        .unwrap_or_else(|| "request_inbox".to_string()),
                };
                item.has_any_id().then_some(item)
            })
            .collect();

        debug!(count = items.len(), "Request inbox poll finished");
        Ok(items)
    }
}
