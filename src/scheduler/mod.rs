//! Time-based scheduling
//!
//! Background jobs that feed the event manager: per-provider content polls,
//! the retry-library sweep, the due-task processor and the ongoing-release
//! monitor, plus daily database maintenance. Every job is contained: a
//! failure in one task is logged and never aborts the scheduler.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::{ScheduleStatus, TaskType};
use crate::events::{Emitter, Event};
use crate::media::{MediaState, ReleaseData};
use crate::program::Program;

const RETRY_PAGE_SIZE: i64 = 10;

/// Create and start the scheduler with all jobs registered.
pub async fn start(program: Arc<Program>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    schedule_content_polls(&scheduler, &program).await?;

    // Retry-library sweep, when enabled.
    let retry_interval = program.settings.get().retry_interval;
    if retry_interval > 0 {
        let retry_program = program.clone();
        let retry_job = Job::new_repeated_async(
            Duration::from_secs(retry_interval),
            move |_uuid, _l| {
                let program = retry_program.clone();
                Box::pin(async move {
                    retry_library(&program).await;
                })
            },
        )?;
        scheduler.add(retry_job).await?;
        info!(interval_secs = retry_interval, "Scheduled retry-library sweep");
    }

    // Due-task processor, every minute.
    let due_program = program.clone();
    let due_job = Job::new_repeated_async(Duration::from_secs(60), move |_uuid, _l| {
        let program = due_program.clone();
        Box::pin(async move {
            process_due_tasks(&program).await;
        })
    })?;
    scheduler.add(due_job).await?;

    // Ongoing-release monitor, every 15 minutes.
    let monitor_program = program.clone();
    let monitor_job = Job::new_repeated_async(Duration::from_secs(15 * 60), move |_uuid, _l| {
        let program = monitor_program.clone();
        Box::pin(async move {
            monitor_ongoing(&program).await;
        })
    })?;
    scheduler.add(monitor_job).await?;

    // Database maintenance, daily at 03:00.
    let maintenance_program = program.clone();
    let maintenance_job = Job::new_async("0 0 3 * * *", move |_uuid, _l| {
        let program = maintenance_program.clone();
        Box::pin(async move {
            info!("Running database maintenance");
            if let Err(e) = program.db.vacuum_and_analyze().await {
                error!(error = %e, "Database maintenance failed");
            }
        })
    })?;
    scheduler.add(maintenance_job).await?;

    scheduler.start().await?;
    info!("Scheduler started");
    Ok(scheduler)
}

/// Register each validated provider: webhook-style providers poll once at
/// startup, the rest poll on their configured interval (with an immediate
/// first poll).
async fn schedule_content_polls(scheduler: &JobScheduler, program: &Arc<Program>) -> Result<()> {
    let Some(services) = program.services() else {
        return Ok(());
    };

    for provider in &services.providers {
        let settings = provider.settings();

        if settings.use_webhook {
            program.submit_provider_poll(provider.clone());
            info!(provider = provider.key(), "Scheduled one-shot poll (webhook mode)");
            continue;
        }

        let interval = settings.update_interval.max(60);
        program.submit_provider_poll(provider.clone());

        let poll_program = program.clone();
        let poll_provider = provider.clone();
        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _l| {
            let program = poll_program.clone();
            let provider = poll_provider.clone();
            Box::pin(async move {
                program.submit_provider_poll(provider);
            })
        })?;
        scheduler.add(job).await?;
        info!(
            provider = provider.key(),
            interval_secs = interval,
            "Scheduled content poll"
        );
    }
    Ok(())
}

/// Emit a retry event for every non-completed top-level item, one page at a
/// time.
async fn retry_library(program: &Arc<Program>) {
    let repo = program.db.media_items();
    let count = match repo.count_retryable().await {
        Ok(count) => count,
        Err(e) => {
            error!(error = %e, "Retry sweep could not count items");
            return;
        }
    };
    if count == 0 {
        debug!("No items required retrying");
        return;
    }

    let mut retried = 0usize;
    let mut offset = 0i64;
    while offset < count {
        let ids = match repo.retry_library(RETRY_PAGE_SIZE, offset).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Retry sweep page failed");
                break;
            }
        };
        if ids.is_empty() {
            break;
        }
        for id in ids {
            if program.em.add_event(Event::for_item(Emitter::RetryLibrary, id)).await {
                retried += 1;
            }
        }
        offset += RETRY_PAGE_SIZE;
    }

    info!(retried, total = count, "Retry sweep finished");
}

/// Load due pending tasks and process each in isolation.
async fn process_due_tasks(program: &Arc<Program>) {
    let now = Local::now().naive_local();
    let tasks = match program.db.scheduled_tasks().due_tasks(now).await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!(error = %e, "Could not load due tasks");
            return;
        }
    };

    for task in tasks {
        if let Err(e) = process_single_task(program, &task).await {
            error!(task_id = task.id, error = %e, "Scheduled task failed");
            mark_task(program, task.id, ScheduleStatus::Failed).await;
        }
    }
}

async fn process_single_task(
    program: &Arc<Program>,
    task: &crate::db::ScheduledTaskRecord,
) -> Result<()> {
    let repo = program.db.media_items();

    let Some(item) = repo.get_by_id(task.item_id).await? else {
        debug!(task_id = task.id, item_id = task.item_id, "Task target no longer exists");
        mark_task(program, task.id, ScheduleStatus::Failed).await;
        return Ok(());
    };

    let Some(task_type) = task.task_type() else {
        anyhow::bail!("corrupt task type {:?}", task.task_type);
    };

    if task_type.is_reindex() {
        let Some(services) = program.services() else {
            anyhow::bail!("services not initialized");
        };
        services
            .indexer
            .index_item(item.id, &CancellationToken::new())
            .await?;
        info!(item_id = item.id, "Reindexed {} from scheduler", item.log_label());
    } else {
        let was_completed = item.state() == MediaState::Completed;
        repo.store_state(item.id).await?;
        if !was_completed {
            program
                .em
                .add_event(Event::for_item(Emitter::Scheduler, item.id))
                .await;
            info!(item_id = item.id, "Enqueued {} from scheduler", item.log_label());
        }
    }

    mark_task(program, task.id, ScheduleStatus::Completed).await;
    Ok(())
}

async fn mark_task(program: &Arc<Program>, task_id: i64, status: ScheduleStatus) {
    let now = Local::now().naive_local();
    if let Err(e) = program.db.scheduled_tasks().mark(task_id, status, now).await {
        error!(task_id, error = %e, "Could not mark task status");
    }
}

/// Ensure schedules exist for upcoming releases and metadata refreshes.
async fn monitor_ongoing(program: &Arc<Program>) {
    let now = Local::now().naive_local();
    let offset_seconds = program.settings.get().indexer.schedule_offset_minutes * 60;

    schedule_upcoming_episodes(program, now, offset_seconds).await;
    schedule_upcoming_movies(program, now, offset_seconds).await;
    schedule_ongoing_shows(program, now).await;
    schedule_dateless_movies(program, now).await;
}

async fn schedule_upcoming_episodes(program: &Arc<Program>, now: NaiveDateTime, offset: i64) {
    let episodes = match program.db.media_items().upcoming_episodes(now).await {
        Ok(episodes) => episodes,
        Err(e) => {
            error!(error = %e, "Could not list upcoming episodes");
            return;
        }
    };
    let tasks = program.db.scheduled_tasks();
    for (id, aired_at) in episodes {
        let run_at = aired_at + ChronoDuration::seconds(offset);
        match tasks.has_future_task(id, TaskType::EpisodeRelease, now).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!(item_id = id, error = %e, "Schedule lookup failed");
                continue;
            }
        }
        if let Err(e) = tasks
            .schedule(id, TaskType::EpisodeRelease, run_at, Some(offset), Some("monitor:episode_air"))
            .await
        {
            debug!(item_id = id, error = %e, "Skipping episode schedule");
        }
    }
}

async fn schedule_upcoming_movies(program: &Arc<Program>, now: NaiveDateTime, offset: i64) {
    let movies = match program.db.media_items().upcoming_movies(now).await {
        Ok(movies) => movies,
        Err(e) => {
            error!(error = %e, "Could not list upcoming movies");
            return;
        }
    };
    let tasks = program.db.scheduled_tasks();
    for (id, aired_at) in movies {
        let run_at = aired_at + ChronoDuration::seconds(offset);
        match tasks.has_future_task(id, TaskType::MovieRelease, now).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!(item_id = id, error = %e, "Schedule lookup failed");
                continue;
            }
        }
        if let Err(e) = tasks
            .schedule(id, TaskType::MovieRelease, run_at, Some(offset), Some("monitor:movie_release"))
            .await
        {
            debug!(item_id = id, error = %e, "Skipping movie schedule");
        }
    }
}

/// Shows in Ongoing/Unreleased get a reindex at their computed next air
/// time, or a daily fallback at the next top-of-hour plus a day.
async fn schedule_ongoing_shows(program: &Arc<Program>, now: NaiveDateTime) {
    let shows = match program.db.media_items().ongoing_shows().await {
        Ok(shows) => shows,
        Err(e) => {
            error!(error = %e, "Could not list ongoing shows");
            return;
        }
    };
    let tasks = program.db.scheduled_tasks();

    for (id, release_data) in shows {
        let release: ReleaseData = release_data
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let (when, reason) = match compute_next_air(&release, now) {
            Some(next_air) if next_air > now => (next_air, "monitor:next_air"),
            _ => (daily_fallback(now), "monitor:fallback_daily"),
        };

        match tasks.has_future_task(id, TaskType::ReindexShow, now).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!(item_id = id, error = %e, "Schedule lookup failed");
                continue;
            }
        }
        if let Err(e) = tasks
            .schedule(id, TaskType::ReindexShow, when, None, Some(reason))
            .await
        {
            debug!(item_id = id, error = %e, "Skipping show reindex schedule");
        }
    }
}

async fn schedule_dateless_movies(program: &Arc<Program>, now: NaiveDateTime) {
    let movies = match program.db.media_items().dateless_movies().await {
        Ok(movies) => movies,
        Err(e) => {
            error!(error = %e, "Could not list dateless movies");
            return;
        }
    };
    let tasks = program.db.scheduled_tasks();
    for id in movies {
        match tasks.has_future_task(id, TaskType::ReindexMovie, now).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!(item_id = id, error = %e, "Schedule lookup failed");
                continue;
            }
        }
        if let Err(e) = tasks
            .schedule(id, TaskType::ReindexMovie, daily_fallback(now), None, Some("monitor:fallback_daily"))
            .await
        {
            debug!(item_id = id, error = %e, "Skipping movie reindex schedule");
        }
    }
}

/// Tomorrow at the current hour, minutes and below zeroed.
fn daily_fallback(now: NaiveDateTime) -> NaiveDateTime {
    (now + ChronoDuration::days(1))
        .with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now + ChronoDuration::days(1))
}

/// Compute the next air time from the indexer's release payload.
///
/// Strategy: an explicit `next_aired` wins when it is not in the past
/// (date-only values are combined with `airs_time`); otherwise the first
/// flagged weekday within three weeks at `airs_time`. A recognized
/// `timezone` interprets the naive value in that zone before converting to
/// local; unknown zones are treated as already local.
pub fn compute_next_air(release: &ReleaseData, reference: NaiveDateTime) -> Option<NaiveDateTime> {
    if let Some(parsed) = parse_next_aired(release) {
        let local = to_local_naive(release.timezone.as_deref(), parsed);
        if local >= reference {
            return Some(local);
        }
        // Past next_aired: fall through to the weekday computation.
    }

    let (hour, minute) = parse_airs_time(release.airs_time.as_deref())?;
    let flagged = release.airs_days.as_ref()?.flagged();
    if flagged.is_empty() {
        return None;
    }

    for offset in 0..21i64 {
        let day = (reference + ChronoDuration::days(offset)).date();
        if !flagged.contains(&day.weekday().num_days_from_monday()) {
            continue;
        }
        let candidate = day.and_time(NaiveTime::from_hms_opt(hour, minute, 0)?);
        let candidate = to_local_naive(release.timezone.as_deref(), candidate);
        if candidate >= reference {
            return Some(candidate);
        }
    }
    None
}

fn parse_next_aired(release: &ReleaseData) -> Option<NaiveDateTime> {
    let raw = release.next_aired.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.contains('T') || raw.contains(' ') {
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(dt);
            }
        }
        return None;
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let (hour, minute) = parse_airs_time(release.airs_time.as_deref()).unwrap_or((0, 0));
    date.and_hms_opt(hour, minute, 0)
}

fn parse_airs_time(raw: Option<&str>) -> Option<(u32, u32)> {
    let raw = raw?.trim();
    let (hour, minute) = raw.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Interpret a naive datetime in the named zone (when recognized) and
/// convert it to local naive time. Unknown or missing zones pass through.
fn to_local_naive(timezone: Option<&str>, dt: NaiveDateTime) -> NaiveDateTime {
    let Some(name) = timezone else {
        return dt;
    };
    let Ok(tz) = Tz::from_str(name) else {
        return dt;
    };
    match tz.from_local_datetime(&dt).single() {
        Some(aware) => aware.with_timezone(&Local).naive_local(),
        None => dt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AirsDays;

    fn reference() -> NaiveDateTime {
        // Monday 2025-01-13 10:00 local.
        NaiveDate::from_ymd_opt(2025, 1, 13)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn weekday_flags_find_the_next_tuesday() {
        let release = ReleaseData {
            airs_days: Some(AirsDays {
                tuesday: true,
                ..AirsDays::default()
            }),
            airs_time: Some("20:00".into()),
            ..ReleaseData::default()
        };

        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 1, 14)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn same_day_airs_later_today() {
        // Monday flagged, air time after the reference.
        let release = ReleaseData {
            airs_days: Some(AirsDays {
                monday: true,
                ..AirsDays::default()
            }),
            airs_time: Some("21:30".into()),
            ..ReleaseData::default()
        };
        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 1, 13)
                .unwrap()
                .and_hms_opt(21, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn explicit_future_next_aired_wins() {
        let release = ReleaseData {
            next_aired: Some("2025-02-01T19:00:00".into()),
            airs_days: Some(AirsDays {
                tuesday: true,
                ..AirsDays::default()
            }),
            airs_time: Some("20:00".into()),
            ..ReleaseData::default()
        };
        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 2, 1)
                .unwrap()
                .and_hms_opt(19, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn date_only_next_aired_combines_with_airs_time() {
        let release = ReleaseData {
            next_aired: Some("2025-01-20".into()),
            airs_time: Some("20:00".into()),
            ..ReleaseData::default()
        };
        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 1, 20)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn past_next_aired_falls_through_to_weekdays() {
        let release = ReleaseData {
            next_aired: Some("2024-12-01".into()),
            airs_days: Some(AirsDays {
                tuesday: true,
                ..AirsDays::default()
            }),
            airs_time: Some("20:00".into()),
            ..ReleaseData::default()
        };
        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 1, 14)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn unknown_timezone_is_treated_as_local() {
        let release = ReleaseData {
            next_aired: Some("2025-03-01T12:00:00".into()),
            timezone: Some("Mars/Olympus_Mons".into()),
            ..ReleaseData::default()
        };
        let next = compute_next_air(&release, reference()).unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn no_usable_hints_yields_nothing() {
        assert!(compute_next_air(&ReleaseData::default(), reference()).is_none());

        let release = ReleaseData {
            airs_time: Some("20:00".into()),
            airs_days: Some(AirsDays::default()),
            ..ReleaseData::default()
        };
        assert!(compute_next_air(&release, reference()).is_none());

        let release = ReleaseData {
            next_aired: Some("garbage".into()),
            ..ReleaseData::default()
        };
        assert!(compute_next_air(&release, reference()).is_none());
    }

    #[test]
    fn bad_airs_times_are_rejected() {
        assert_eq!(parse_airs_time(Some("20:00")), Some((20, 0)));
        assert_eq!(parse_airs_time(Some("7:05")), Some((7, 5)));
        assert_eq!(parse_airs_time(Some("25:00")), None);
        assert_eq!(parse_airs_time(Some("20")), None);
        assert_eq!(parse_airs_time(None), None);
    }

    #[test]
    fn daily_fallback_is_next_day_top_of_hour() {
        let fallback = daily_fallback(reference());
        assert_eq!(
            fallback,
            NaiveDate::from_ymd_opt(2025, 1, 14)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }
}
