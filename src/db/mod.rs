//! Database connection and repositories

pub mod filesystem_entries;
pub mod media_items;
pub mod scheduled_tasks;
pub mod streams;

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

pub use filesystem_entries::{FilesystemEntryRecord, FilesystemEntryRepository};
pub use media_items::{CreateMediaItem, IndexedMetadata, MediaItemRecord, MediaItemRepository};
pub use scheduled_tasks::{ScheduleStatus, ScheduledTaskRecord, ScheduledTaskRepository, TaskType};
pub use streams::StreamRepository;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;

        Ok(Self { pool })
    }

    /// Connect, retrying until the database becomes available or the
    /// deadline passes. Used at startup where the database container may
    /// still be coming up.
    pub async fn connect_with_retry(url: &str, deadline: Duration) -> Result<Self> {
        let started = std::time::Instant::now();
        loop {
            match Self::connect(url).await {
                Ok(db) => return Ok(db),
                Err(e) if started.elapsed() < deadline => {
                    warn!(error = %e, "Database not ready, retrying in 2s");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a media item repository
    pub fn media_items(&self) -> MediaItemRepository {
        MediaItemRepository::new(self.pool.clone())
    }

    /// Get a scheduled task repository
    pub fn scheduled_tasks(&self) -> ScheduledTaskRepository {
        ScheduledTaskRepository::new(self.pool.clone())
    }

    /// Get a stream repository
    pub fn streams(&self) -> StreamRepository {
        StreamRepository::new(self.pool.clone())
    }

    /// Get a filesystem entry repository
    pub fn filesystem_entries(&self) -> FilesystemEntryRepository {
        FilesystemEntryRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Reclaim dead tuples and refresh planner statistics. Runs from the
    /// scheduler's daily maintenance job.
    pub async fn vacuum_and_analyze(&self) -> Result<()> {
        for table in [
            "media_items",
            "streams",
            "stream_relations",
            "stream_blacklist_relations",
            "filesystem_entries",
            "scheduled_tasks",
        ] {
            sqlx::query(&format!("VACUUM (ANALYZE) {table}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
