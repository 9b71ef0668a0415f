//! Filesystem entry store
//!
//! Joined-table inheritance: shared columns live on `filesystem_entries`,
//! per-kind payloads on `media_entries` / `subtitle_entries`.

use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FilesystemEntryRecord {
    pub id: i64,
    pub entry_kind: String,
    pub path: String,
    pub file_size: i64,
    pub is_directory: bool,
    pub available_in_vfs: bool,
    pub media_item_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Filesystem entry repository for database operations
pub struct FilesystemEntryRepository {
    pool: PgPool,
}

impl FilesystemEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a media file for an item. Upserts on path so re-symlinking
    /// an item does not duplicate entries.
    pub async fn create_media_entry(
        &self,
        media_item_id: i64,
        path: &str,
        original_path: Option<&str>,
        file_size: i64,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO filesystem_entries \
                 (entry_kind, path, file_size, available_in_vfs, media_item_id, updated_at) \
             VALUES ('media', $1, $2, TRUE, $3, (now() AT TIME ZONE 'utc')) \
             ON CONFLICT (path) DO UPDATE SET \
                 file_size = EXCLUDED.file_size, \
                 media_item_id = EXCLUDED.media_item_id, \
                 available_in_vfs = TRUE, \
                 updated_at = (now() AT TIME ZONE 'utc') \
             RETURNING id",
        )
        .bind(path)
        .bind(file_size)
        .bind(media_item_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO media_entries (entry_id, original_path) VALUES ($1, $2) \
             ON CONFLICT (entry_id) DO UPDATE SET original_path = EXCLUDED.original_path",
        )
        .bind(id)
        .bind(original_path)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Register a subtitle file beside an item's media entry.
    pub async fn create_subtitle_entry(
        &self,
        media_item_id: i64,
        path: &str,
        language: &str,
        forced: bool,
        file_size: i64,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO filesystem_entries \
                 (entry_kind, path, file_size, available_in_vfs, media_item_id, updated_at) \
             VALUES ('subtitle', $1, $2, TRUE, $3, (now() AT TIME ZONE 'utc')) \
             ON CONFLICT (path) DO UPDATE SET \
                 file_size = EXCLUDED.file_size, \
                 updated_at = (now() AT TIME ZONE 'utc') \
             RETURNING id",
        )
        .bind(path)
        .bind(file_size)
        .bind(media_item_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO subtitle_entries (entry_id, language, forced) VALUES ($1, $2, $3) \
             ON CONFLICT (entry_id) DO UPDATE SET \
                 language = EXCLUDED.language, forced = EXCLUDED.forced",
        )
        .bind(id)
        .bind(language)
        .bind(forced)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn for_item(&self, media_item_id: i64) -> Result<Vec<FilesystemEntryRecord>> {
        let records = sqlx::query_as::<_, FilesystemEntryRecord>(
            "SELECT * FROM filesystem_entries WHERE media_item_id = $1 ORDER BY path",
        )
        .bind(media_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Subtitle languages already present for an item.
    pub async fn subtitle_languages(&self, media_item_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT se.language FROM subtitle_entries se \
             JOIN filesystem_entries fe ON fe.id = se.entry_id \
             WHERE fe.media_item_id = $1",
        )
        .bind(media_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(l,)| l).collect())
    }

    /// Everything exposed through the virtual filesystem.
    pub async fn vfs_listing(&self) -> Result<Vec<FilesystemEntryRecord>> {
        let records = sqlx::query_as::<_, FilesystemEntryRecord>(
            "SELECT * FROM filesystem_entries WHERE available_in_vfs ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn set_vfs_availability(&self, path: &str, available: bool) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE filesystem_entries SET available_in_vfs = $2, \
             updated_at = (now() AT TIME ZONE 'utc') WHERE path = $1",
        )
        .bind(path)
        .bind(available)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
