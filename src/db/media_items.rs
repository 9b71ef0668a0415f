//! Media item store
//!
//! Single-table polymorphic rows (`item_type` discriminator). The queue and
//! dispatch paths deliberately select only the handful of columns they need;
//! full records are loaded by the workers that mutate them.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use sqlx::PgPool;
use tracing::debug;

use crate::media::{
    ActiveStream, ChildView, ItemKind, ItemSnapshot, MediaState, QueueView, derive_parent_state,
};

/// A full media item row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaItemRecord {
    pub id: i64,
    pub item_type: String,
    pub parent_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub last_state: String,
    pub paused_state: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub is_anime: bool,
    pub aliases: serde_json::Value,
    pub release_data: Option<serde_json::Value>,
    pub active_stream: Option<serde_json::Value>,
    pub parsed_data: Option<serde_json::Value>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub requested_by: Option<String>,
    pub requested_at: NaiveDateTime,
    pub indexed_at: Option<NaiveDateTime>,
    pub scraped_at: Option<NaiveDateTime>,
    pub aired_at: Option<NaiveDateTime>,
    pub scraped_times: i32,
}

impl MediaItemRecord {
    pub fn kind(&self) -> ItemKind {
        self.item_type.parse().unwrap_or(ItemKind::Movie)
    }

    pub fn state(&self) -> MediaState {
        self.last_state.parse().unwrap_or(MediaState::Unknown)
    }

    pub fn active_stream(&self) -> Option<ActiveStream> {
        self.active_stream
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn log_label(&self) -> String {
        match (self.title.as_deref(), self.year) {
            (Some(t), Some(y)) => format!("{t} ({y})"),
            (Some(t), None) => t.to_string(),
            _ => format!("item {}", self.id),
        }
    }
}

/// Input for inserting a new media item.
#[derive(Debug, Clone, Default)]
pub struct CreateMediaItem {
    pub kind: ItemKind,
    pub parent_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub aired_at: Option<NaiveDateTime>,
    pub requested_by: Option<String>,
}

/// Metadata the indexer writes back onto an item.
#[derive(Debug, Clone, Default)]
pub struct IndexedMetadata {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub is_anime: bool,
    pub aliases: serde_json::Value,
    pub release_data: Option<serde_json::Value>,
    pub aired_at: Option<NaiveDateTime>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
}

/// Media item repository for database operations
pub struct MediaItemRepository {
    pool: PgPool,
}

impl MediaItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<MediaItemRecord>> {
        let record = sqlx::query_as::<_, MediaItemRecord>("SELECT * FROM media_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Thin view for enqueue/dispatch decisions. Selects only the columns
    /// the hot path needs.
    pub async fn queue_view(&self, id: i64) -> Result<Option<QueueView>> {
        let row = sqlx::query_as::<_, (i64, String, String, Option<i64>)>(
            "SELECT id, item_type, last_state, parent_id FROM media_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, item_type, last_state, parent_id)| QueueView {
            id,
            kind: item_type.parse().unwrap_or(ItemKind::Movie),
            state: last_state.parse().unwrap_or(MediaState::Unknown),
            parent_id,
        }))
    }

    /// Header plus direct children, for state-machine routing.
    pub async fn snapshot(&self, id: i64) -> Result<Option<ItemSnapshot>> {
        let header = sqlx::query_as::<
            _,
            (
                i64,
                String,
                String,
                Option<i64>,
                Option<NaiveDateTime>,
                Option<NaiveDateTime>,
                Option<NaiveDateTime>,
                i32,
            ),
        >(
            "SELECT id, item_type, last_state, parent_id, indexed_at, aired_at, \
                    scraped_at, scraped_times \
             FROM media_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, item_type, last_state, parent_id, indexed_at, aired_at, scraped_at, scraped_times)) =
            header
        else {
            return Ok(None);
        };

        let children = sqlx::query_as::<_, (i64, String, Option<NaiveDateTime>)>(
            "SELECT id, last_state, aired_at FROM media_items \
             WHERE parent_id = $1 ORDER BY season_number NULLS LAST, episode_number NULLS LAST",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, state, aired_at)| ChildView {
            id,
            state: state.parse().unwrap_or(MediaState::Unknown),
            aired_at,
        })
        .collect();

        Ok(Some(ItemSnapshot {
            id,
            kind: item_type.parse().unwrap_or(ItemKind::Movie),
            state: last_state.parse().unwrap_or(MediaState::Unknown),
            parent_id,
            indexed_at,
            aired_at,
            scraped_at,
            scraped_times,
            children,
        }))
    }

    /// Find an item id by any of its external ids, restricted to top-level
    /// kinds (movie/show).
    pub async fn find_by_external_ids(
        &self,
        imdb_id: Option<&str>,
        tmdb_id: Option<&str>,
        tvdb_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM media_items \
             WHERE item_type IN ('movie', 'show') \
               AND (($1::text IS NOT NULL AND imdb_id = $1) \
                 OR ($2::text IS NOT NULL AND tmdb_id = $2) \
                 OR ($3::text IS NOT NULL AND tvdb_id = $3)) \
             LIMIT 1",
        )
        .bind(imdb_id)
        .bind(tmdb_id)
        .bind(tvdb_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn exists_by_any_id(
        &self,
        imdb_id: Option<&str>,
        tmdb_id: Option<&str>,
        tvdb_id: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .find_by_external_ids(imdb_id, tmdb_id, tvdb_id)
            .await?
            .is_some())
    }

    /// `(self_id, descendant_ids)` for parent/child deduplication.
    pub async fn get_item_ids(&self, id: i64) -> Result<(i64, Vec<i64>)> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "WITH RECURSIVE tree AS ( \
                 SELECT id FROM media_items WHERE parent_id = $1 \
                 UNION ALL \
                 SELECT m.id FROM media_items m JOIN tree t ON m.parent_id = t.id \
             ) SELECT id FROM tree",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok((id, rows.into_iter().map(|(id,)| id).collect()))
    }

    /// Ids of non-completed top-level items, most recently requested first.
    /// Paged so the retry sweep never loads the whole library at once.
    pub async fn retry_library(&self, limit: i64, offset: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM media_items \
             WHERE item_type IN ('movie', 'show') AND last_state != 'Completed' \
             ORDER BY requested_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count_retryable(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM media_items \
             WHERE item_type IN ('movie', 'show') AND last_state != 'Completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Insert a new item. Returns the existing row's id on an external-id
    /// collision (a dedupe win, not a fault).
    pub async fn create(&self, input: CreateMediaItem) -> Result<i64> {
        let inserted = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO media_items ( \
                 item_type, parent_id, imdb_id, tmdb_id, tvdb_id, title, year, \
                 season_number, episode_number, aired_at, requested_by \
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT DO NOTHING RETURNING id",
        )
        .bind(input.kind.as_str())
        .bind(input.parent_id)
        .bind(&input.imdb_id)
        .bind(&input.tmdb_id)
        .bind(&input.tvdb_id)
        .bind(&input.title)
        .bind(input.year)
        .bind(input.season_number)
        .bind(input.episode_number)
        .bind(input.aired_at)
        .bind(&input.requested_by)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        debug!(
            kind = %input.kind, imdb = ?input.imdb_id, tmdb = ?input.tmdb_id, tvdb = ?input.tvdb_id,
            "Duplicate media item insert, reusing existing row"
        );
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM media_items \
             WHERE item_type = $1 \
               AND (($2::text IS NOT NULL AND imdb_id = $2) \
                 OR ($3::text IS NOT NULL AND tmdb_id = $3) \
                 OR ($4::text IS NOT NULL AND tvdb_id = $4)) \
             LIMIT 1",
        )
        .bind(input.kind.as_str())
        .bind(&input.imdb_id)
        .bind(&input.tmdb_id)
        .bind(&input.tvdb_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(id,)| id)
            .context("duplicate insert but no existing row found")
    }

    /// Delete an item. Children, filesystem entries, subtitles and stream
    /// relations all go with it via cascade.
    pub async fn delete(&self, id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_state(&self, id: i64, state: MediaState) -> Result<()> {
        sqlx::query("UPDATE media_items SET last_state = $2 WHERE id = $1")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recompute a parent's derived state from its direct children. Leaf
    /// items keep whatever state the workers set. Never recurses into
    /// ancestors; see [`update_ancestor_states`](Self::update_ancestor_states).
    pub async fn store_state(&self, id: i64) -> Result<MediaState> {
        let Some(snapshot) = self.snapshot(id).await? else {
            anyhow::bail!("media item {id} not found");
        };

        if !matches!(snapshot.kind, ItemKind::Show | ItemKind::Season) {
            return Ok(snapshot.state);
        }
        // Paused and Failed are sticky and never overwritten by derivation.
        if matches!(snapshot.state, MediaState::Paused | MediaState::Failed) {
            return Ok(snapshot.state);
        }

        let now = Local::now().naive_local();
        let derived = derive_parent_state(&snapshot.children, now);
        if derived != snapshot.state {
            self.set_state(id, derived).await?;
        }
        Ok(derived)
    }

    /// Refresh derived state up the parent chain, nearest ancestor first.
    pub async fn update_ancestor_states(&self, id: i64) -> Result<()> {
        let mut cursor = self.queue_view(id).await?.and_then(|v| v.parent_id);
        while let Some(parent_id) = cursor {
            self.store_state(parent_id).await?;
            cursor = self.queue_view(parent_id).await?.and_then(|v| v.parent_id);
        }
        Ok(())
    }

    /// Walk the parent chain looking for a state that blocks descendants.
    pub async fn is_parent_blocked(&self, id: i64) -> Result<bool> {
        let mut cursor = self.queue_view(id).await?.and_then(|v| v.parent_id);
        while let Some(parent_id) = cursor {
            let Some(view) = self.queue_view(parent_id).await? else {
                break;
            };
            if view.state.blocks_children() {
                return Ok(true);
            }
            cursor = view.parent_id;
        }
        Ok(false)
    }

    /// Pause an item, remembering the state to restore on unpause.
    pub async fn pause(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET paused_state = last_state, last_state = 'Paused' \
             WHERE id = $1 AND last_state != 'Paused'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Restore the state an item held before it was paused.
    pub async fn unpause(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE media_items \
             SET last_state = COALESCE(paused_state, 'Requested'), paused_state = NULL \
             WHERE id = $1 AND last_state = 'Paused'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear acquisition progress on an item and its descendants so the full
    /// pipeline re-runs. Indexed metadata is kept.
    pub async fn reset(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "WITH RECURSIVE tree AS ( \
                 SELECT id FROM media_items WHERE id = $1 \
                 UNION ALL \
                 SELECT m.id FROM media_items m JOIN tree t ON m.parent_id = t.id \
             ) \
             UPDATE media_items SET \
                 active_stream = NULL, \
                 scraped_at = NULL, \
                 scraped_times = 0, \
                 paused_state = NULL, \
                 last_state = CASE WHEN indexed_at IS NULL THEN 'Requested' ELSE 'Indexed' END \
             WHERE id IN (SELECT id FROM tree)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "WITH RECURSIVE tree AS ( \
                 SELECT id FROM media_items WHERE id = $1 \
                 UNION ALL \
                 SELECT m.id FROM media_items m JOIN tree t ON m.parent_id = t.id \
             ) \
             DELETE FROM filesystem_entries WHERE media_item_id IN (SELECT id FROM tree)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Apply indexer output: canonical ids, presentation metadata and
    /// release hints, and advance to Indexed.
    pub async fn apply_indexed(&self, id: i64, meta: &IndexedMetadata) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET \
                 title = COALESCE($2, title), \
                 year = COALESCE($3, year), \
                 genres = $4, \
                 is_anime = $5, \
                 aliases = $6, \
                 release_data = COALESCE($7, release_data), \
                 aired_at = COALESCE($8, aired_at), \
                 imdb_id = COALESCE($9, imdb_id), \
                 tmdb_id = COALESCE($10, tmdb_id), \
                 tvdb_id = COALESCE($11, tvdb_id), \
                 indexed_at = (now() AT TIME ZONE 'utc'), \
                 last_state = 'Indexed' \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&meta.title)
        .bind(meta.year)
        .bind(&meta.genres)
        .bind(meta.is_anime)
        .bind(&meta.aliases)
        .bind(&meta.release_data)
        .bind(meta.aired_at)
        .bind(&meta.imdb_id)
        .bind(&meta.tmdb_id)
        .bind(&meta.tvdb_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bump the scrape attempt counter and stamp the attempt time.
    pub async fn record_scrape_attempt(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET \
                 scraped_times = scraped_times + 1, \
                 scraped_at = (now() AT TIME ZONE 'utc') \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active_stream(&self, id: i64, stream: &ActiveStream) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET active_stream = $2, last_state = 'Downloaded' WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(stream)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Episodes airing in the future that are not yet completed.
    pub async fn upcoming_episodes(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<(i64, NaiveDateTime)>> {
        let rows = sqlx::query_as::<_, (i64, NaiveDateTime)>(
            "SELECT id, aired_at FROM media_items \
             WHERE item_type = 'episode' AND aired_at IS NOT NULL AND aired_at >= $1 \
               AND last_state != 'Completed'",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Movies with a known future release date that are not yet completed.
    pub async fn upcoming_movies(&self, now: NaiveDateTime) -> Result<Vec<(i64, NaiveDateTime)>> {
        let rows = sqlx::query_as::<_, (i64, NaiveDateTime)>(
            "SELECT id, aired_at FROM media_items \
             WHERE item_type = 'movie' AND aired_at IS NOT NULL AND aired_at >= $1 \
               AND last_state != 'Completed'",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Shows whose schedule the monitor keeps refreshed.
    pub async fn ongoing_shows(&self) -> Result<Vec<(i64, Option<serde_json::Value>)>> {
        let rows = sqlx::query_as::<_, (i64, Option<serde_json::Value>)>(
            "SELECT id, release_data FROM media_items \
             WHERE item_type = 'show' AND last_state IN ('Ongoing', 'Unreleased')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Movies with no known release date, still waiting on metadata.
    pub async fn dateless_movies(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM media_items \
             WHERE item_type = 'movie' AND aired_at IS NULL \
               AND last_state IN ('Unreleased', 'Indexed', 'Requested', 'Unknown')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Per-kind totals for startup logging.
    pub async fn counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT item_type, COUNT(*) FROM media_items GROUP BY item_type ORDER BY item_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
