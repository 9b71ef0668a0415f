//! Scraper service
//!
//! Asks the aggregator for candidate infohashes, normalizes them, and
//! persists them as streams on the item. Attempts are gated: a capped
//! number of tries, an exponential backoff window between them, and no
//! scraping before release.

use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkerOutput;
use super::rate_limiter::{RateLimitedClient, RetryPolicy, retry_async};
use crate::config::ScrapingSettings;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::media::{ItemKind, ItemSnapshot, MediaState, normalize_infohash};

/// The scraping gate: released, under the attempt cap, and outside the
/// backoff window `base * 2^attempts` since the last attempt.
pub fn can_we_scrape(
    snapshot: &ItemSnapshot,
    settings: &ScrapingSettings,
    now: NaiveDateTime,
) -> bool {
    if !snapshot.aired_at.is_some_and(|a| a <= now) {
        return false;
    }
    if snapshot.scraped_times >= settings.max_attempts as i32 {
        return false;
    }
    if let Some(last) = snapshot.scraped_at {
        let exponent = snapshot.scraped_times.clamp(0, 10) as u32;
        let window = settings.backoff_base_secs.saturating_mul(1u64 << exponent);
        if now - last < Duration::seconds(window as i64) {
            return false;
        }
    }
    true
}

#[derive(Debug, Deserialize)]
struct AggregatorResponse {
    #[serde(default)]
    streams: Vec<AggregatorStream>,
}

#[derive(Debug, Deserialize)]
struct AggregatorStream {
    #[serde(alias = "infoHash")]
    infohash: String,
    title: String,
    #[serde(default)]
    rank: i32,
}

/// HTTP client for the scraper aggregator. The query is parameterized by
/// item type, season/episode and external ids; each upstream indexer gets
/// its own timeout and the whole scrape a total budget.
pub struct AggregatorClient {
    http: RateLimitedClient,
    settings: ScrapingSettings,
    retry: RetryPolicy,
}

impl AggregatorClient {
    pub fn new(settings: ScrapingSettings) -> Self {
        Self {
            http: RateLimitedClient::for_aggregator(),
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn initialized(&self) -> bool {
        !self.settings.aggregator_url.is_empty()
    }

    /// `{infohash -> (title, rank)}` candidates for an item.
    pub async fn scrape(
        &self,
        kind: ItemKind,
        imdb_id: Option<&str>,
        tmdb_id: Option<&str>,
        tvdb_id: Option<&str>,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> CoreResult<Vec<(String, String, i32)>> {
        if !self.initialized() {
            return Err(CoreError::LogicGate("no aggregator configured".into()));
        }
        let url = format!("{}/api/v1/scrape", self.settings.aggregator_url.trim_end_matches('/'));

        let media_type = match kind {
            ItemKind::Movie => "movie",
            _ => "series",
        };
        let season_q = season.map(|s| s.to_string());
        let episode_q = episode.map(|e| e.to_string());
        let timeout_q = self.settings.indexer_timeout_secs.to_string();

        let mut query: Vec<(&str, &str)> = vec![("type", media_type), ("timeout", &timeout_q)];
        if let Some(v) = imdb_id {
            query.push(("imdb_id", v));
        }
        if let Some(v) = tmdb_id {
            query.push(("tmdb_id", v));
        }
        if let Some(v) = tvdb_id {
            query.push(("tvdb_id", v));
        }
        if let Some(v) = &season_q {
            query.push(("season", v));
        }
        if let Some(v) = &episode_q {
            query.push(("episode", v));
        }

        let api_key = self.settings.aggregator_api_key.clone();
        let response = retry_async(
            || async {
                let response = self
                    .http
                    .get_with_query(&url, &[("X-Api-Key", api_key.as_str())], &query)
                    .await
                    .map_err(|e| CoreError::ExternalTransient(format!("aggregator: {e}")))?;
                if !response.status().is_success() {
                    let err = CoreError::from_status(response.status(), "aggregator");
                    if err.is_transient() {
                        return Err(err);
                    }
                    return Ok(Err(err));
                }
                Ok(Ok(response))
            },
            &self.retry,
            "aggregator scrape",
        )
        .await??;

        let body: AggregatorResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("aggregator decode: {e}")))?;

        Ok(body
            .streams
            .into_iter()
            .map(|s| (s.infohash, s.title, s.rank))
            .collect())
    }
}

/// The scraper worker.
pub struct ScraperService {
    client: AggregatorClient,
    db: Database,
    settings: ScrapingSettings,
}

impl ScraperService {
    pub fn new(db: Database, settings: ScrapingSettings) -> Self {
        Self {
            client: AggregatorClient::new(settings.clone()),
            db,
            settings,
        }
    }

    pub fn initialized(&self) -> bool {
        self.client.initialized()
    }

    pub fn settings(&self) -> &ScrapingSettings {
        &self.settings
    }

    /// Scrape an item: record the attempt, fetch candidates within the
    /// total budget, persist the streams, and advance to Scraped when any
    /// candidate survived normalization and the blacklist.
    pub async fn run_for_item(
        &self,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<WorkerOutput>> {
        let repo = self.db.media_items();
        let Some(record) = repo.get_by_id(item_id).await? else {
            warn!(item_id, "Scrape target vanished");
            return Ok(Vec::new());
        };

        repo.record_scrape_attempt(item_id).await?;

        let budget = std::time::Duration::from_secs(self.settings.total_budget_secs.max(1));
        let scrape = self.client.scrape(
            record.kind(),
            record.imdb_id.as_deref(),
            record.tmdb_id.as_deref(),
            record.tvdb_id.as_deref(),
            record.season_number,
            record.episode_number,
        );
        let found = match tokio::time::timeout(budget, scrape).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(item_id, error = %e, "Scrape failed");
                return Ok(Vec::new());
            }
            Err(_) => {
                warn!(item_id, budget_secs = budget.as_secs(), "Scrape budget exhausted");
                return Ok(Vec::new());
            }
        };

        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let streams = self.db.streams();
        let mut linked = 0usize;
        let mut skipped = 0usize;
        for (raw_hash, title, rank) in found {
            let Some(infohash) = normalize_infohash(&raw_hash) else {
                skipped += 1;
                continue;
            };
            let stream_id = streams.upsert(&infohash, &title, None, rank).await?;
            if streams.link(item_id, stream_id).await? {
                linked += 1;
            }
        }

        if linked == 0 {
            debug!(item_id, skipped, "Scrape yielded no usable streams");
            return Ok(Vec::new());
        }

        repo.set_state(item_id, MediaState::Scraped).await?;
        info!(
            item_id,
            streams = linked,
            skipped,
            "Scraped {}",
            record.log_label()
        );
        Ok(vec![WorkerOutput::item(item_id)])
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    fn snapshot(
        aired_offset_days: Option<i64>,
        scraped_times: i32,
        scraped_offset_secs: Option<i64>,
    ) -> ItemSnapshot {
        let now = Local::now().naive_local();
        ItemSnapshot {
            id: 1,
            kind: ItemKind::Movie,
            state: MediaState::Indexed,
            parent_id: None,
            indexed_at: Some(now),
            aired_at: aired_offset_days.map(|d| now + Duration::days(d)),
            scraped_at: scraped_offset_secs.map(|s| now - Duration::seconds(s)),
            scraped_times,
            children: Vec::new(),
        }
    }

    fn settings() -> ScrapingSettings {
        ScrapingSettings {
            max_attempts: 5,
            backoff_base_secs: 1800,
            ..ScrapingSettings::default()
        }
    }

    #[test]
    fn unreleased_items_are_gated() {
        let now = Local::now().naive_local();
        assert!(!can_we_scrape(&snapshot(Some(3), 0, None), &settings(), now));
        assert!(!can_we_scrape(&snapshot(None, 0, None), &settings(), now));
        assert!(can_we_scrape(&snapshot(Some(-3), 0, None), &settings(), now));
    }

    #[test]
    fn attempt_cap_closes_the_gate() {
        let now = Local::now().naive_local();
        assert!(!can_we_scrape(&snapshot(Some(-3), 5, None), &settings(), now));
        assert!(can_we_scrape(&snapshot(Some(-3), 4, Some(1_000_000)), &settings(), now));
    }

    #[test]
    fn backoff_window_doubles_per_attempt() {
        let now = Local::now().naive_local();
        // After 1 attempt the window is base * 2 = 3600 s.
        assert!(!can_we_scrape(&snapshot(Some(-3), 1, Some(3000)), &settings(), now));
        assert!(can_we_scrape(&snapshot(Some(-3), 1, Some(4000)), &settings(), now));
        // After 2 attempts it doubles again.
        assert!(!can_we_scrape(&snapshot(Some(-3), 2, Some(7000)), &settings(), now));
        assert!(can_we_scrape(&snapshot(Some(-3), 2, Some(7300)), &settings(), now));
    }
}
