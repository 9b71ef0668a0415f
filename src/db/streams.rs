//! Stream store
//!
//! Streams are shared across items through a many-to-many relation, with a
//! per-item blacklist kept disjoint from the candidate set: blacklisting
//! removes the candidate relation in the same transaction.

use anyhow::Result;
use sqlx::PgPool;

use crate::media::Stream;

#[derive(Debug, Clone, sqlx::FromRow)]
struct StreamRow {
    id: i64,
    infohash: String,
    raw_title: String,
    parsed_title: Option<String>,
    rank: i32,
}

impl From<StreamRow> for Stream {
    fn from(row: StreamRow) -> Self {
        Stream {
            id: row.id,
            infohash: row.infohash.trim().to_string(),
            raw_title: row.raw_title,
            parsed_title: row.parsed_title,
            rank: row.rank,
        }
    }
}

/// Stream repository for database operations
pub struct StreamRepository {
    pool: PgPool,
}

impl StreamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a stream row, returning its id.
    pub async fn upsert(
        &self,
        infohash: &str,
        raw_title: &str,
        parsed_title: Option<&str>,
        rank: i32,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO streams (infohash, raw_title, parsed_title, rank) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (infohash) DO UPDATE SET \
                 raw_title = EXCLUDED.raw_title, \
                 parsed_title = EXCLUDED.parsed_title, \
                 rank = EXCLUDED.rank \
             RETURNING id",
        )
        .bind(infohash)
        .bind(raw_title)
        .bind(parsed_title)
        .bind(rank)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Relate a stream to an item as a candidate, unless the item has
    /// blacklisted it.
    pub async fn link(&self, item_id: i64, stream_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO stream_relations (media_item_id, stream_id) \
             SELECT $1, $2 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM stream_blacklist_relations \
                 WHERE media_item_id = $1 AND stream_id = $2 \
             ) \
             ON CONFLICT DO NOTHING",
        )
        .bind(item_id)
        .bind(stream_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Candidate streams for an item, best rank first.
    pub async fn candidates_for(&self, item_id: i64) -> Result<Vec<Stream>> {
        let rows = sqlx::query_as::<_, StreamRow>(
            "SELECT s.id, s.infohash, s.raw_title, s.parsed_title, s.rank \
             FROM streams s \
             JOIN stream_relations r ON r.stream_id = s.id \
             WHERE r.media_item_id = $1 \
             ORDER BY s.rank DESC, s.id ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Stream::from).collect())
    }

    pub async fn blacklisted_for(&self, item_id: i64) -> Result<Vec<Stream>> {
        let rows = sqlx::query_as::<_, StreamRow>(
            "SELECT s.id, s.infohash, s.raw_title, s.parsed_title, s.rank \
             FROM streams s \
             JOIN stream_blacklist_relations r ON r.stream_id = s.id \
             WHERE r.media_item_id = $1 \
             ORDER BY s.id ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Stream::from).collect())
    }

    /// Move a stream from the candidate set to the blacklist. The two sets
    /// stay disjoint by removing the candidate relation in the same
    /// transaction.
    pub async fn blacklist(&self, item_id: i64, stream_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM stream_relations WHERE media_item_id = $1 AND stream_id = $2")
            .bind(item_id)
            .bind(stream_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO stream_blacklist_relations (media_item_id, stream_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(item_id)
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Blacklist by infohash, for the downloader's failure path.
    pub async fn blacklist_hash(&self, item_id: i64, infohash: &str) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM streams WHERE infohash = $1")
            .bind(infohash)
            .fetch_optional(&self.pool)
            .await?;
        if let Some((stream_id,)) = row {
            self.blacklist(item_id, stream_id).await?;
        }
        Ok(())
    }

    /// Move a stream back from the blacklist to the candidate set.
    pub async fn unblacklist(&self, item_id: i64, stream_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM stream_blacklist_relations WHERE media_item_id = $1 AND stream_id = $2",
        )
        .bind(item_id)
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO stream_relations (media_item_id, stream_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(item_id)
        .bind(stream_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drop all stream relations for an item, candidates and blacklist both.
    pub async fn reset_for_item(&self, item_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM stream_relations WHERE media_item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stream_blacklist_relations WHERE media_item_id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
