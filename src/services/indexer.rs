//! Indexer service
//!
//! Enriches requested items with canonical metadata from the indexer APIs:
//! resolves external ids, fills titles/years/genres/aliases, creates the
//! season/episode tree for shows, and records next-air hints for the
//! release monitor. Movies resolve against a TMDB-style API, shows against
//! a TVDB-style one; the composite picks per kind.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::WorkerOutput;
use super::rate_limiter::{RateLimitedClient, RetryPolicy, retry_async};
use crate::config::IndexerSettings;
use crate::db::{CreateMediaItem, Database, IndexedMetadata};
use crate::error::{CoreError, CoreResult};
use crate::media::{Aliases, ContentItem, ItemKind, ReleaseData};

/// External ids used to look an item up.
#[derive(Debug, Clone, Default)]
pub struct ExternalIds {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
}

impl From<&ContentItem> for ExternalIds {
    fn from(ci: &ContentItem) -> Self {
        Self {
            imdb_id: ci.imdb_id.clone(),
            tmdb_id: ci.tmdb_id.clone(),
            tvdb_id: ci.tvdb_id.clone(),
        }
    }
}

/// Canonical metadata for a movie or a show.
#[derive(Debug, Clone, Default)]
pub struct TitleDetails {
    pub kind: ItemKind,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub first_aired: Option<NaiveDateTime>,
    pub genres: Vec<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub network: Option<String>,
    pub aliases: Aliases,
    pub release_data: Option<ReleaseData>,
}

impl TitleDetails {
    /// Anime detection the rest of the pipeline keys the library layout on.
    pub fn is_anime(&self) -> bool {
        let animated = self
            .genres
            .iter()
            .any(|g| g.eq_ignore_ascii_case("anime") || g.eq_ignore_ascii_case("animation"));
        let jp = self
            .country
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("jp"))
            || self
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case("ja"));
        self.genres.iter().any(|g| g.eq_ignore_ascii_case("anime")) || (animated && jp)
    }
}

#[derive(Debug, Clone)]
pub struct SeasonDetails {
    pub number: i32,
    pub tvdb_id: Option<String>,
    pub aired: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct EpisodeDetails {
    pub number: i32,
    pub title: Option<String>,
    pub tvdb_id: Option<String>,
    pub aired: Option<NaiveDateTime>,
}

/// The indexer API surface the orchestrator consumes.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    async fn get_movie_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails>;
    async fn get_show_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails>;
    async fn get_series_seasons(&self, tvdb_id: &str) -> CoreResult<Vec<SeasonDetails>>;
    async fn get_season_episodes(&self, season_tvdb_id: &str) -> CoreResult<Vec<EpisodeDetails>>;
    /// Resolve unknown-kind requests: which kind do these ids point at?
    async fn search_by_external_id(&self, ids: &ExternalIds) -> CoreResult<ItemKind>;
}

fn parse_air_date(raw: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw?;
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// --- TMDB-style movie API -------------------------------------------------

#[derive(Debug, Deserialize)]
struct TmdbFindResponse {
    #[serde(default)]
    movie_results: Vec<TmdbMovie>,
    #[serde(default)]
    tv_results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: i64,
    title: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
    original_language: Option<String>,
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbAlternativeTitles {
    #[serde(default)]
    titles: Vec<TmdbAltTitle>,
}

#[derive(Debug, Deserialize)]
struct TmdbAltTitle {
    iso_3166_1: String,
    title: String,
}

pub struct TmdbClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: RateLimitedClient::for_indexer_api(),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn initialized(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> CoreResult<T> {
        let mut query_pairs: Vec<(&str, &str)> = vec![("api_key", self.api_key.as_str())];
        query_pairs.extend_from_slice(query);

        let response = retry_async(
            || async {
                let response = self
                    .http
                    .get_with_query(url, &[], &query_pairs)
                    .await
                    .map_err(|e| CoreError::ExternalTransient(format!("tmdb: {e}")))?;
                if !response.status().is_success() {
                    let err = CoreError::from_status(response.status(), "tmdb");
                    if err.is_transient() {
                        return Err(err);
                    }
                    return Ok(Err(err));
                }
                Ok(Ok(response))
            },
            &self.retry,
            "tmdb request",
        )
        .await??;

        response
            .json::<T>()
            .await
            .map_err(|e| CoreError::ExternalTransient(format!("tmdb decode: {e}")))
    }

    async fn resolve_movie(&self, ids: &ExternalIds) -> CoreResult<TmdbMovie> {
        if let Some(tmdb_id) = &ids.tmdb_id {
            let url = format!("{}/movie/{tmdb_id}", self.base_url);
            return self.fetch_json(&url, &[]).await;
        }
        if let Some(imdb_id) = &ids.imdb_id {
            let url = format!("{}/find/{imdb_id}", self.base_url);
            let found: TmdbFindResponse = self
                .fetch_json(&url, &[("external_source", "imdb_id")])
                .await?;
            let movie = found
                .movie_results
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::NotFound(format!("tmdb movie for {imdb_id}")))?;
            // The find endpoint returns a slim record; re-fetch the full one.
            let url = format!("{}/movie/{}", self.base_url, movie.id);
            return self.fetch_json(&url, &[]).await;
        }
        Err(CoreError::NotFound("movie lookup needs imdb or tmdb id".into()))
    }

    async fn movie_aliases(&self, tmdb_id: i64) -> Aliases {
        let url = format!("{}/movie/{tmdb_id}/alternative_titles", self.base_url);
        match self.fetch_json::<TmdbAlternativeTitles>(&url, &[]).await {
            Ok(alt) => {
                let mut aliases = Aliases::new();
                for title in alt.titles {
                    aliases
                        .entry(title.iso_3166_1.to_lowercase())
                        .or_default()
                        .push(title.title);
                }
                aliases
            }
            Err(e) => {
                debug!(tmdb_id, error = %e, "No alternative titles");
                Aliases::new()
            }
        }
    }

    pub async fn movie_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails> {
        let movie = self.resolve_movie(ids).await?;
        let aliases = self.movie_aliases(movie.id).await;
        let first_aired = parse_air_date(movie.release_date.as_deref());

        Ok(TitleDetails {
            kind: ItemKind::Movie,
            imdb_id: movie.imdb_id.clone().or_else(|| ids.imdb_id.clone()),
            tmdb_id: Some(movie.id.to_string()),
            tvdb_id: ids.tvdb_id.clone(),
            title: movie.title.clone(),
            year: first_aired.map(|d| d.date().year()),
            first_aired,
            genres: movie.genres.iter().map(|g| g.name.to_lowercase()).collect(),
            country: None,
            language: movie.original_language.clone(),
            network: None,
            aliases,
            release_data: None,
        })
    }

    pub async fn found_kind(&self, imdb_id: &str) -> CoreResult<Option<ItemKind>> {
        let url = format!("{}/find/{imdb_id}", self.base_url);
        let found: TmdbFindResponse = self
            .fetch_json(&url, &[("external_source", "imdb_id")])
            .await?;
        if !found.movie_results.is_empty() {
            return Ok(Some(ItemKind::Movie));
        }
        if !found.tv_results.is_empty() {
            return Ok(Some(ItemKind::Show));
        }
        Ok(None)
    }
}

// --- TVDB-style series API ------------------------------------------------

#[derive(Debug, Deserialize)]
struct TvdbEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TvdbSearchResult {
    #[serde(default)]
    series: Option<TvdbSeries>,
    #[serde(default)]
    movie: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TvdbSeries {
    id: i64,
    name: Option<String>,
    #[serde(rename = "firstAired")]
    first_aired: Option<String>,
    #[serde(default)]
    genres: Vec<TvdbGenre>,
    #[serde(rename = "originalCountry")]
    original_country: Option<String>,
    #[serde(rename = "originalLanguage")]
    original_language: Option<String>,
    #[serde(rename = "latestNetwork")]
    network: Option<TvdbNetwork>,
    #[serde(rename = "airsDays")]
    airs_days: Option<serde_json::Value>,
    #[serde(rename = "airsTime")]
    airs_time: Option<String>,
    #[serde(rename = "nextAired")]
    next_aired: Option<String>,
    #[serde(default)]
    aliases: Vec<TvdbAlias>,
    #[serde(default)]
    seasons: Vec<TvdbSeason>,
    #[serde(rename = "timezone")]
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvdbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TvdbNetwork {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvdbAlias {
    language: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TvdbSeason {
    id: i64,
    number: i32,
    #[serde(rename = "type")]
    season_type: Option<TvdbSeasonType>,
}

#[derive(Debug, Deserialize)]
struct TvdbSeasonType {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TvdbSeasonExtended {
    #[serde(default)]
    episodes: Vec<TvdbEpisode>,
}

#[derive(Debug, Deserialize)]
struct TvdbEpisode {
    id: i64,
    number: i32,
    name: Option<String>,
    aired: Option<String>,
}

pub struct TvdbClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl TvdbClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: RateLimitedClient::for_indexer_api(),
            base_url: "https://api4.thetvdb.com/v4".to_string(),
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn initialized(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        let auth = format!("Bearer {}", self.api_key);
        let response = retry_async(
            || async {
                let response = self
                    .http
                    .get(url, &[("Authorization", auth.as_str())])
                    .await
                    .map_err(|e| CoreError::ExternalTransient(format!("tvdb: {e}")))?;
                if !response.status().is_success() {
                    let err = CoreError::from_status(response.status(), "tvdb");
                    if err.is_transient() {
                        return Err(err);
                    }
                    return Ok(Err(err));
                }
                Ok(Ok(response))
            },
            &self.retry,
            "tvdb request",
        )
        .await??;

        response
            .json::<TvdbEnvelope<T>>()
            .await
            .map(|envelope| envelope.data)
            .map_err(|e| CoreError::ExternalTransient(format!("tvdb decode: {e}")))
    }

    async fn resolve_series(&self, ids: &ExternalIds) -> CoreResult<TvdbSeries> {
        if let Some(tvdb_id) = &ids.tvdb_id {
            let url = format!("{}/series/{tvdb_id}/extended", self.base_url);
            return self.fetch_json(&url).await;
        }
        let remote = ids
            .imdb_id
            .as_deref()
            .or(ids.tmdb_id.as_deref())
            .ok_or_else(|| CoreError::NotFound("show lookup needs an external id".into()))?;
        let url = format!("{}/search/remoteid/{remote}", self.base_url);
        let results: Vec<TvdbSearchResult> = self.fetch_json(&url).await?;
        let series = results
            .into_iter()
            .filter_map(|r| r.series)
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("tvdb series for {remote}")))?;
        let url = format!("{}/series/{}/extended", self.base_url, series.id);
        self.fetch_json(&url).await
    }

    fn release_data(series: &TvdbSeries) -> ReleaseData {
        ReleaseData {
            next_aired: series.next_aired.clone(),
            airs_days: series
                .airs_days
                .as_ref()
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            airs_time: series.airs_time.clone(),
            timezone: series.timezone.clone(),
        }
    }

    pub async fn show_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails> {
        let series = self.resolve_series(ids).await?;
        let first_aired = parse_air_date(series.first_aired.as_deref());

        let mut aliases = Aliases::new();
        for alias in &series.aliases {
            aliases
                .entry(
                    alias
                        .language
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                )
                .or_default()
                .push(alias.name.clone());
        }

        Ok(TitleDetails {
            kind: ItemKind::Show,
            imdb_id: ids.imdb_id.clone(),
            tmdb_id: ids.tmdb_id.clone(),
            tvdb_id: Some(series.id.to_string()),
            title: series.name.clone(),
            year: first_aired.map(|d| d.date().year()),
            first_aired,
            genres: series.genres.iter().map(|g| g.name.to_lowercase()).collect(),
            country: series.original_country.clone(),
            language: series.original_language.clone(),
            network: series.network.as_ref().and_then(|n| n.name.clone()),
            aliases,
            release_data: Some(Self::release_data(&series)),
        })
    }

    pub async fn series_seasons(&self, tvdb_id: &str) -> CoreResult<Vec<SeasonDetails>> {
        let url = format!("{}/series/{tvdb_id}/extended", self.base_url);
        let series: TvdbSeries = self.fetch_json(&url).await?;
        Ok(series
            .seasons
            .into_iter()
            .filter(|s| {
                s.season_type
                    .as_ref()
                    .and_then(|t| t.kind.as_deref())
                    .map(|k| k == "official")
                    .unwrap_or(true)
            })
            .map(|s| SeasonDetails {
                number: s.number,
                tvdb_id: Some(s.id.to_string()),
                aired: None,
            })
            .collect())
    }

    pub async fn season_episodes(&self, season_tvdb_id: &str) -> CoreResult<Vec<EpisodeDetails>> {
        let url = format!("{}/seasons/{season_tvdb_id}/extended", self.base_url);
        let season: TvdbSeasonExtended = self.fetch_json(&url).await?;
        Ok(season
            .episodes
            .into_iter()
            .map(|e| EpisodeDetails {
                number: e.number,
                title: e.name,
                tvdb_id: Some(e.id.to_string()),
                aired: parse_air_date(e.aired.as_deref()),
            })
            .collect())
    }

    pub async fn found_kind(&self, ids: &ExternalIds) -> CoreResult<Option<ItemKind>> {
        let remote = match ids.imdb_id.as_deref().or(ids.tvdb_id.as_deref()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let url = format!("{}/search/remoteid/{remote}", self.base_url);
        let results: Vec<TvdbSearchResult> = self.fetch_json(&url).await?;
        for result in results {
            if result.series.is_some() {
                return Ok(Some(ItemKind::Show));
            }
            if result.movie.is_some() {
                return Ok(Some(ItemKind::Movie));
            }
        }
        Ok(None)
    }
}

/// Movie lookups go to the TMDB-style API, shows to the TVDB-style one.
pub struct CompositeIndexer {
    tmdb: TmdbClient,
    tvdb: TvdbClient,
}

impl CompositeIndexer {
    pub fn new(settings: &IndexerSettings) -> Self {
        Self {
            tmdb: TmdbClient::new(settings.tmdb_api_key.clone()),
            tvdb: TvdbClient::new(settings.tvdb_api_key.clone()),
        }
    }

    pub fn initialized(&self) -> bool {
        self.tmdb.initialized() || self.tvdb.initialized()
    }
}

#[async_trait]
impl IndexerApi for CompositeIndexer {
    async fn get_movie_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails> {
        self.tmdb.movie_details(ids).await
    }

    async fn get_show_details(&self, ids: &ExternalIds) -> CoreResult<TitleDetails> {
        self.tvdb.show_details(ids).await
    }

    async fn get_series_seasons(&self, tvdb_id: &str) -> CoreResult<Vec<SeasonDetails>> {
        self.tvdb.series_seasons(tvdb_id).await
    }

    async fn get_season_episodes(&self, season_tvdb_id: &str) -> CoreResult<Vec<EpisodeDetails>> {
        self.tvdb.season_episodes(season_tvdb_id).await
    }

    async fn search_by_external_id(&self, ids: &ExternalIds) -> CoreResult<ItemKind> {
        if ids.tvdb_id.is_some() {
            return Ok(ItemKind::Show);
        }
        if let Some(imdb_id) = &ids.imdb_id {
            if self.tmdb.initialized() {
                if let Some(kind) = self.tmdb.found_kind(imdb_id).await? {
                    return Ok(kind);
                }
            }
        }
        if self.tvdb.initialized() {
            if let Some(kind) = self.tvdb.found_kind(ids).await? {
                return Ok(kind);
            }
        }
        if ids.tmdb_id.is_some() {
            return Ok(ItemKind::Movie);
        }
        Err(CoreError::NotFound("no indexer recognized the ids".into()))
    }
}

/// The indexer worker.
pub struct IndexerService {
    api: Arc<dyn IndexerApi>,
    db: Database,
    initialized: bool,
}

impl IndexerService {
    pub fn new(db: Database, settings: &IndexerSettings) -> Self {
        let composite = CompositeIndexer::new(settings);
        let initialized = composite.initialized();
        Self {
            api: Arc::new(composite),
            db,
            initialized,
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Resolve a transient content item into a persisted, indexed item.
    pub async fn run_for_content(
        &self,
        content: &ContentItem,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkerOutput>> {
        let ids = ExternalIds::from(content);
        let kind = match content.kind {
            Some(kind) if kind.is_top_level() => kind,
            _ => match self.api.search_by_external_id(&ids).await {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(request = %content.log_label(), error = %e, "Could not resolve request kind");
                    return Ok(Vec::new());
                }
            },
        };

        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let item_id = self
            .db
            .media_items()
            .create(CreateMediaItem {
                kind,
                imdb_id: content.imdb_id.clone(),
                tmdb_id: content.tmdb_id.clone(),
                tvdb_id: content.tvdb_id.clone(),
                requested_by: Some(content.requested_by.clone()),
                ..CreateMediaItem::default()
            })
            .await?;

        self.index_item(item_id, cancel).await?;
        Ok(vec![WorkerOutput::item(item_id)])
    }

    /// Re-index a persisted item in place.
    pub async fn run_for_item(
        &self,
        item_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkerOutput>> {
        self.index_item(item_id, cancel).await?;
        Ok(vec![WorkerOutput::item(item_id)])
    }

    /// Fetch metadata and write it through. Shows also get their missing
    /// seasons and episodes filled in; existing children are kept.
    pub async fn index_item(&self, item_id: i64, cancel: &CancellationToken) -> Result<()> {
        let repo = self.db.media_items();
        let record = repo
            .get_by_id(item_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("media item {item_id} not found"))?;

        let ids = ExternalIds {
            imdb_id: record.imdb_id.clone(),
            tmdb_id: record.tmdb_id.clone(),
            tvdb_id: record.tvdb_id.clone(),
        };

        let details = match record.kind() {
            ItemKind::Movie => self.api.get_movie_details(&ids).await?,
            ItemKind::Show => self.api.get_show_details(&ids).await?,
            other => {
                debug!(item_id, kind = %other, "Only top-level items are indexed directly");
                return Ok(());
            }
        };

        if cancel.is_cancelled() {
            return Ok(());
        }

        repo.apply_indexed(
            item_id,
            &IndexedMetadata {
                title: details.title.clone(),
                year: details.year,
                genres: details.genres.clone(),
                is_anime: details.is_anime(),
                aliases: serde_json::to_value(&details.aliases)?,
                release_data: details
                    .release_data
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?,
                aired_at: details.first_aired,
                imdb_id: details.imdb_id.clone(),
                tmdb_id: details.tmdb_id.clone(),
                tvdb_id: details.tvdb_id.clone(),
            },
        )
        .await?;

        if details.kind == ItemKind::Show {
            if let Some(tvdb_id) = &details.tvdb_id {
                self.fill_in_children(item_id, tvdb_id, cancel).await?;
            }
            repo.store_state(item_id).await?;
        }

        info!(item_id, title = ?details.title, "Indexed {}", record.log_label());
        Ok(())
    }

    /// Create season/episode rows the store does not have yet. Existing
    /// children are merged, not replaced, so acquisition progress survives
    /// reindexing.
    async fn fill_in_children(
        &self,
        show_id: i64,
        tvdb_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let repo = self.db.media_items();
        let seasons = match self.api.get_series_seasons(tvdb_id).await {
            Ok(seasons) => seasons,
            Err(e) => {
                warn!(show_id, error = %e, "Could not list seasons");
                return Ok(());
            }
        };

        for season in seasons {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if season.number == 0 {
                continue; // specials are not tracked
            }

            let season_id = repo
                .create(CreateMediaItem {
                    kind: ItemKind::Season,
                    parent_id: Some(show_id),
                    tvdb_id: season.tvdb_id.clone(),
                    season_number: Some(season.number),
                    aired_at: season.aired,
                    ..CreateMediaItem::default()
                })
                .await?;

            let Some(season_tvdb) = &season.tvdb_id else {
                continue;
            };
            let episodes = match self.api.get_season_episodes(season_tvdb).await {
                Ok(episodes) => episodes,
                Err(e) => {
                    warn!(season_id, error = %e, "Could not list episodes");
                    continue;
                }
            };

            for episode in episodes {
                repo.create(CreateMediaItem {
                    kind: ItemKind::Episode,
                    parent_id: Some(season_id),
                    tvdb_id: episode.tvdb_id,
                    title: episode.title,
                    season_number: Some(season.number),
                    episode_number: Some(episode.number),
                    aired_at: episode.aired,
                    ..CreateMediaItem::default()
                })
                .await?;
            }

            repo.store_state(season_id).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn air_dates_parse_both_shapes() {
        assert_eq!(
            parse_air_date(Some("1999-03-31")),
            NaiveDate::from_ymd_opt(1999, 3, 31).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert!(parse_air_date(Some("2024-01-02T20:00:00")).is_some());
        assert!(parse_air_date(Some("not a date")).is_none());
        assert!(parse_air_date(None).is_none());
    }

    #[test]
    fn anime_detection_needs_animation_plus_origin() {
        let mut details = TitleDetails {
            genres: vec!["animation".into()],
            country: Some("us".into()),
            ..TitleDetails::default()
        };
        assert!(!details.is_anime());

        details.country = Some("jp".into());
        assert!(details.is_anime());

        details = TitleDetails {
            genres: vec!["anime".into()],
            ..TitleDetails::default()
        };
        assert!(details.is_anime());
    }
}
