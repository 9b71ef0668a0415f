//! Persisted schedule operations
//!
//! Rows are unique over `(item_id, task_type, scheduled_for)`; a duplicate
//! schedule attempt is a benign no-op reported as `false`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use sqlx::PgPool;
use tracing::debug;

use crate::error::CoreError;

/// What a scheduled task should do when it comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    EpisodeRelease,
    MovieRelease,
    ReindexShow,
    ReindexMovie,
    Reindex,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EpisodeRelease => "episode_release",
            Self::MovieRelease => "movie_release",
            Self::ReindexShow => "reindex_show",
            Self::ReindexMovie => "reindex_movie",
            Self::Reindex => "reindex",
        }
    }

    /// Reindex tasks run the indexer synchronously instead of enqueueing.
    pub fn is_reindex(&self) -> bool {
        matches!(self, Self::ReindexShow | Self::ReindexMovie | Self::Reindex)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episode_release" => Ok(Self::EpisodeRelease),
            "movie_release" => Ok(Self::MovieRelease),
            "reindex_show" => Ok(Self::ReindexShow),
            "reindex_movie" => Ok(Self::ReindexMovie),
            "reindex" => Ok(Self::Reindex),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A persisted schedule row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledTaskRecord {
    pub id: i64,
    pub item_id: i64,
    pub task_type: String,
    pub scheduled_for: NaiveDateTime,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub executed_at: Option<NaiveDateTime>,
    pub offset_seconds: Option<i64>,
    pub reason: Option<String>,
}

impl ScheduledTaskRecord {
    pub fn task_type(&self) -> Option<TaskType> {
        self.task_type.parse().ok()
    }
}

/// Scheduled task repository for database operations
pub struct ScheduledTaskRepository {
    pool: PgPool,
}

impl ScheduledTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a pending task. Returns `false` when an identical pending row
    /// already exists (unique violation). Errors on a `when` that is not in
    /// the future.
    pub async fn schedule(
        &self,
        item_id: i64,
        task_type: TaskType,
        when: NaiveDateTime,
        offset_seconds: Option<i64>,
        reason: Option<&str>,
    ) -> Result<bool> {
        let now = Local::now().naive_local();
        if when <= now {
            anyhow::bail!(
                "cannot schedule {task_type} for item {item_id} in the past ({when})"
            );
        }

        let result = sqlx::query(
            "INSERT INTO scheduled_tasks (item_id, task_type, scheduled_for, offset_seconds, reason) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item_id)
        .bind(task_type.as_str())
        .bind(when)
        .bind(offset_seconds)
        .bind(reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => match CoreError::from_sqlx(e, "schedule insert") {
                CoreError::IntegrityDuplicate(_) => {
                    debug!(item_id, task_type = %task_type, %when, "Duplicate schedule, skipping");
                    Ok(false)
                }
                other => Err(other.into()),
            },
        }
    }

    /// Pending tasks whose time has come, oldest first.
    pub async fn due_tasks(&self, now: NaiveDateTime) -> Result<Vec<ScheduledTaskRecord>> {
        let records = sqlx::query_as::<_, ScheduledTaskRecord>(
            "SELECT * FROM scheduled_tasks \
             WHERE status = 'pending' AND scheduled_for <= $1 \
             ORDER BY scheduled_for ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Whether a pending task of this type already sits in the future for
    /// the item. Used by the monitor to avoid piling up duplicates.
    pub async fn has_future_task(
        &self,
        item_id: i64,
        task_type: TaskType,
        now: NaiveDateTime,
    ) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM scheduled_tasks \
             WHERE item_id = $1 AND task_type = $2 AND status = 'pending' \
               AND scheduled_for >= $3 \
             LIMIT 1",
        )
        .bind(item_id)
        .bind(task_type.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Atomic status update.
    pub async fn mark(
        &self,
        task_id: i64,
        status: ScheduleStatus,
        executed_at: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_tasks SET status = $2, executed_at = $3 WHERE id = $1")
            .bind(task_id)
            .bind(status.as_str())
            .bind(executed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cancel all pending tasks for an item (admin remove path).
    pub async fn cancel_pending_for_item(&self, item_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET status = 'cancelled' \
             WHERE item_id = $1 AND status = 'pending'",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Pending tasks over the next `days` days, for the calendar view.
    pub async fn upcoming(&self, now: NaiveDateTime, days: i64) -> Result<Vec<ScheduledTaskRecord>> {
        let end = now + chrono::Duration::days(days);
        let records = sqlx::query_as::<_, ScheduledTaskRecord>(
            "SELECT * FROM scheduled_tasks \
             WHERE status = 'pending' AND scheduled_for >= $1 AND scheduled_for <= $2 \
             ORDER BY scheduled_for ASC",
        )
        .bind(now)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
