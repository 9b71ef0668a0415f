//! Post-processing service
//!
//! Runs after completion: fetches missing subtitles for completed movies
//! and episodes and registers them beside the media entry. Disabled unless
//! configured; completed items with every language present are skipped.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkerOutput;
use super::rate_limiter::{RateLimitedClient, RetryPolicy, retry_async};
use crate::config::SubtitleSettings;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::media::ItemKind;

/// A fetched subtitle, ready to be written beside the media file.
#[derive(Debug, Clone)]
pub struct SubtitleFile {
    pub language: String,
    pub forced: bool,
    pub content: Vec<u8>,
}

/// The subtitle provider surface the orchestrator consumes.
#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    async fn search(&self, imdb_id: &str, language: &str) -> CoreResult<Option<SubtitleFile>>;
}

#[derive(Debug, Deserialize)]
struct ProviderSearchResponse {
    #[serde(default)]
    results: Vec<ProviderSubtitle>,
}

#[derive(Debug, Deserialize)]
struct ProviderSubtitle {
    download_url: String,
    #[serde(default)]
    forced: bool,
}

/// OpenSubtitles-style HTTP provider.
pub struct HttpSubtitleProvider {
    http: RateLimitedClient,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpSubtitleProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            http: RateLimitedClient::for_content("subtitles"),
            base_url,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SubtitleProvider for HttpSubtitleProvider {
    async fn search(&self, imdb_id: &str, language: &str) -> CoreResult<Option<SubtitleFile>> {
        let url = format!("{}/subtitles", self.base_url.trim_end_matches('/'));
        let query = [("imdb_id", imdb_id), ("language", language)];

        let response = retry_async(
            || async {
                self.http
                    .get_with_query(&url, &[], &query)
                    .await
                    .map_err(|e| CoreError::ExternalTransient(format!("subtitles: {e}")))
            },
            &self.retry,
            "subtitle search",
        )
        .await?;
        if !response.status().is_success() {
            return Err(CoreError::from_status(response.status(), "subtitles"));
        }

        let body: ProviderSearchResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("subtitles decode: {e}")))?;
        let Some(best) = body.results.into_iter().next() else {
            return Ok(None);
        };

        let download = self
            .http
            .get(&best.download_url, &[])
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("subtitle download: {e}")))?;
        if !download.status().is_success() {
            return Err(CoreError::from_status(download.status(), "subtitle download"));
        }
        let content = download
            .bytes()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("subtitle body: {e}")))?;

        Ok(Some(SubtitleFile {
            language: language.to_string(),
            forced: best.forced,
            content: content.to_vec(),
        }))
    }
}

/// Which languages still need fetching for an item.
pub fn missing_languages(wanted: &[String], present: &[String]) -> Vec<String> {
    wanted
        .iter()
        .filter(|lang| !present.iter().any(|p| p.eq_ignore_ascii_case(lang)))
        .cloned()
        .collect()
}

/// The post-processing worker.
pub struct PostProcessorService {
    provider: Option<Box<dyn SubtitleProvider>>,
    db: Database,
    settings: SubtitleSettings,
}

impl PostProcessorService {
    pub fn new(db: Database, settings: SubtitleSettings) -> Self {
        let provider: Option<Box<dyn SubtitleProvider>> =
            if settings.enabled && !settings.provider_url.is_empty() {
                Some(Box::new(HttpSubtitleProvider::new(
                    settings.provider_url.clone(),
                )))
            } else {
                None
            };
        Self {
            provider,
            db,
            settings,
        }
    }

    pub fn enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Whether a completed item still has post-processing work.
    pub async fn should_submit(&self, item_id: i64) -> bool {
        if !self.enabled() {
            return false;
        }
        let Ok(Some(record)) = self.db.media_items().get_by_id(item_id).await else {
            return false;
        };
        // Shows and seasons fan out; only leaves carry subtitles.
        if !matches!(record.kind(), ItemKind::Movie | ItemKind::Episode) {
            return false;
        }
        let Ok(present) = self.db.filesystem_entries().subtitle_languages(item_id).await else {
            return false;
        };
        !missing_languages(&self.settings.languages, &present).is_empty()
    }

    pub async fn run_for_item(
        &self,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkerOutput>> {
        let Some(provider) = &self.provider else {
            return Ok(Vec::new());
        };

        let repo = self.db.media_items();
        let Some(record) = repo.get_by_id(item_id).await? else {
            return Ok(Vec::new());
        };
        let Some(imdb_id) = record.imdb_id.clone() else {
            debug!(item_id, "No imdb id, skipping subtitles");
            return Ok(Vec::new());
        };

        let entries_repo = self.db.filesystem_entries();
        let entries = entries_repo.for_item(item_id).await?;
        let Some(media_entry) = entries.iter().find(|e| e.entry_kind == "media") else {
            debug!(item_id, "No media entry to place subtitles beside");
            return Ok(Vec::new());
        };

        let present = entries_repo.subtitle_languages(item_id).await?;
        let missing = missing_languages(&self.settings.languages, &present);

        let mut fetched = 0usize;
        for language in missing {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            match provider.search(&imdb_id, &language).await {
                Ok(Some(subtitle)) => {
                    if let Err(e) = self
                        .write_subtitle(item_id, &media_entry.path, &subtitle)
                        .await
                    {
                        warn!(item_id, language = %language, error = %e, "Could not store subtitle");
                    } else {
                        fetched += 1;
                    }
                }
                Ok(None) => debug!(item_id, language = %language, "No subtitle found"),
                Err(e) => warn!(item_id, language = %language, error = %e, "Subtitle search failed"),
            }
        }

        if fetched > 0 {
            info!(item_id, fetched, "Subtitles added for {}", record.log_label());
        }
        Ok(vec![WorkerOutput::item(item_id)])
    }

    /// Write `<media stem>.<lang>.srt` beside the media entry and register
    /// it.
    async fn write_subtitle(
        &self,
        item_id: i64,
        media_path: &str,
        subtitle: &SubtitleFile,
    ) -> Result<()> {
        let media = Path::new(media_path);
        let stem = media
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "subtitle".to_string());
        let path = media.with_file_name(format!("{stem}.{}.srt", subtitle.language));

        tokio::fs::write(&path, &subtitle.content).await?;
        self.db
            .filesystem_entries()
            .create_subtitle_entry(
                item_id,
                &path.to_string_lossy(),
                &subtitle.language,
                subtitle.forced,
                subtitle.content.len() as i64,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_languages_is_case_insensitive() {
        let wanted = vec!["en".to_string(), "de".to_string()];
        let present = vec!["EN".to_string()];
        assert_eq!(missing_languages(&wanted, &present), vec!["de".to_string()]);
        assert!(missing_languages(&wanted, &["en".into(), "de".into()]).is_empty());
    }
}
