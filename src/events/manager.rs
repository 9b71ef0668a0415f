//! Event manager
//!
//! Owns the priority queue, the running set and the per-service executors.
//! Deduplicates incoming events (an item, its descendants, or a matching
//! external id may only be in flight once), dispatches to single-worker
//! executors, collects worker results and re-enqueues them.

use std::collections::HashMap;
use std::env;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use anyhow::Result;
use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::queue::EventQueue;
use super::{Emitter, Event};
use crate::db::Database;
use crate::media::ContentItem;
use crate::services::WorkerOutput;

/// The boxed unit of work an executor runs for one event.
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<Vec<WorkerOutput>>> + Send>>;

/// A job handed to a service executor.
pub struct SubmittedJob {
    /// The event being processed; content polls carry none.
    pub event: Option<Event>,
    /// The emitter stamped onto any results.
    pub emitter: Emitter,
    pub cancel: CancellationToken,
    pub work: WorkFuture,
}

struct RunningEntry {
    event: Event,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ManagerState {
    queue: EventQueue,
    running: Vec<RunningEntry>,
}

/// Check in a single pass whether any of the content item's external ids is
/// already represented in the given events. Returns early on first match.
pub(crate) fn content_matches<'a>(
    item: &ContentItem,
    events: impl Iterator<Item = &'a Event>,
) -> bool {
    if !item.has_any_id() {
        return false;
    }
    for event in events {
        let Some(ci) = &event.content_item else {
            continue;
        };
        if item.imdb_id.is_some() && ci.imdb_id == item.imdb_id {
            return true;
        }
        if item.tmdb_id.is_some() && ci.tmdb_id == item.tmdb_id {
            return true;
        }
        if item.tvdb_id.is_some() && ci.tvdb_id == item.tvdb_id {
            return true;
        }
    }
    false
}

pub struct EventManager {
    db: Database,
    state: Mutex<ManagerState>,
    executors: Mutex<HashMap<String, mpsc::UnboundedSender<SubmittedJob>>>,
}

impl EventManager {
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db,
            state: Mutex::new(ManagerState::default()),
            executors: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue an event unless it is a duplicate of queued or running work.
    ///
    /// Item events are rejected when the item, any descendant, or a blocked
    /// ancestor makes them redundant; content-only events are rejected when
    /// any external id already matches queued or running content. Returns
    /// `true` when the event was queued.
    pub async fn add_event(&self, mut event: Event) -> bool {
        if let Some(item_id) = event.item_id {
            let (self_id, descendants) = match self.db.media_items().get_item_ids(item_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(item_id, error = %e, "Failed to resolve item ids for event");
                    return false;
                }
            };

            let view = match self.db.media_items().queue_view(item_id).await {
                Ok(Some(view)) => view,
                Ok(None) => {
                    error!(item_id, "No item found for event");
                    return false;
                }
                Err(e) => {
                    error!(item_id, error = %e, "Failed to load item for event");
                    return false;
                }
            };

            match self.db.media_items().is_parent_blocked(item_id).await {
                Ok(true) => {
                    debug!(item_id, "Not queuing {}: ancestor is blocking", event.log_label());
                    return false;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(item_id, error = %e, "Failed to check parent chain");
                    return false;
                }
            }

            // Cache the state so priority sorting never hits the database.
            event.item_state = Some(view.state);

            let mut state = self.state.lock();
            let mut ids = Vec::with_capacity(descendants.len() + 1);
            ids.push(self_id);
            ids.extend(descendants);
            for id in &ids {
                if state.queue.contains_item(*id)
                    || state.running.iter().any(|r| r.event.item_id == Some(*id))
                {
                    debug!(
                        item_id,
                        duplicate = id,
                        "Item or descendant already queued or running, skipping"
                    );
                    return false;
                }
            }
            debug!(item_id, kind = %view.kind, "Added {} to the queue", event.log_label());
            state.queue.push(event);
            true
        } else {
            let Some(ci) = event.content_item.clone() else {
                debug!("Event has neither item_id nor content_item, skipping");
                return false;
            };
            if !ci.has_any_id() {
                debug!("Content event carries no external ids, skipping");
                return false;
            }

            let mut state = self.state.lock();
            if content_matches(&ci, state.queue.iter())
                || content_matches(&ci, state.running.iter().map(|r| &r.event))
            {
                debug!(
                    "Content item {} already queued or running, skipping",
                    ci.log_label()
                );
                return false;
            }
            debug!("Added {} to the queue", event.log_label());
            state.queue.push(event);
            true
        }
    }

    /// Add a transient item as an event unless it already exists in the
    /// library.
    pub async fn add_item(&self, item: ContentItem, emitted_by: Emitter) -> bool {
        match self
            .db
            .media_items()
            .exists_by_any_id(
                item.imdb_id.as_deref(),
                item.tmdb_id.as_deref(),
                item.tvdb_id.as_deref(),
            )
            .await
        {
            Ok(true) => {
                debug!("Item {} already in the library, skipping", item.log_label());
                false
            }
            Ok(false) => self.add_event(Event::for_content(emitted_by, item)).await,
            Err(e) => {
                error!(error = %e, "Failed to check item existence");
                false
            }
        }
    }

    /// Pop the next eligible event, or `None` when nothing is ready.
    pub fn pop_ready(&self) -> Option<Event> {
        let now = Local::now().naive_local();
        self.state.lock().queue.pop_next(now)
    }

    /// Mark an event as running, pairing it with its cancellation token.
    pub fn mark_running(&self, event: Event, cancel: CancellationToken) {
        self.state.lock().running.push(RunningEntry { event, cancel });
    }

    /// Collect a finished job: drop the running marker, discard cancelled
    /// results, and re-enqueue everything the worker yielded.
    pub async fn on_complete(
        &self,
        event: Option<Event>,
        emitter: Emitter,
        outputs: Vec<WorkerOutput>,
        cancelled: bool,
    ) {
        if let Some(event) = &event {
            self.remove_running(event.id);
        }
        if cancelled {
            if let Some(event) = &event {
                debug!("Job for {} was cancelled, discarding results", event.log_label());
            }
            return;
        }

        for output in outputs {
            let next = match output {
                WorkerOutput::Item { item_id, run_at } => match run_at {
                    Some(at) => Event::for_item_at(emitter.clone(), item_id, at),
                    None => Event::for_item(emitter.clone(), item_id),
                },
                WorkerOutput::Content(ci) => Event::for_content(emitter.clone(), ci),
            };
            self.add_event(next).await;
        }
    }

    fn remove_running(&self, event_id: Uuid) {
        let mut state = self.state.lock();
        if let Some(pos) = state.running.iter().position(|r| r.event.id == event_id) {
            state.running.remove(pos);
        }
    }

    /// Cancel all queued and running work for an item and its descendants.
    pub async fn cancel_job(&self, item_id: i64) {
        let ids = match self.db.media_items().get_item_ids(item_id).await {
            Ok((self_id, mut descendants)) => {
                descendants.push(self_id);
                descendants
            }
            Err(e) => {
                error!(item_id, error = %e, "Failed to resolve ids for cancel");
                vec![item_id]
            }
        };
        self.cancel_ids(&ids);
    }

    fn cancel_ids(&self, ids: &[i64]) {
        let mut state = self.state.lock();
        let dropped = state.queue.drop_items(ids);
        let mut cancelled = 0usize;
        state.running.retain(|entry| {
            let matches = entry.event.item_id.is_some_and(|id| ids.contains(&id));
            if matches {
                entry.cancel.cancel();
                cancelled += 1;
            }
            !matches
        });
        if dropped + cancelled > 0 {
            info!(dropped, cancelled, "Cancelled jobs for {} item ids", ids.len());
        }
    }

    /// `(queued, running)` lengths, for logging and admin introspection.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.queue.len(), state.running.len())
    }

    /// Submit a job to the named executor, creating it on first use.
    pub fn submit(self: &Arc<Self>, executor: &str, job: SubmittedJob) {
        let tx = self.executor(executor);
        if tx.send(job).is_err() {
            error!(executor, "Executor channel closed, dropping job");
        }
    }

    fn executor(self: &Arc<Self>, name: &str) -> mpsc::UnboundedSender<SubmittedJob> {
        let mut executors = self.executors.lock();
        if let Some(tx) = executors.get(name) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let max_workers = executor_max_workers(name);
        tokio::spawn(executor_loop(
            name.to_string(),
            rx,
            Arc::downgrade(self),
            max_workers,
        ));
        executors.insert(name.to_string(), tx.clone());
        tx
    }
}

/// Concurrency per executor: 1 unless overridden via
/// `CURATOR_<SERVICE>_MAX_WORKERS`.
fn executor_max_workers(name: &str) -> usize {
    let var = format!("CURATOR_{}_MAX_WORKERS", name.to_uppercase());
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(1)
}

async fn executor_loop(
    name: String,
    mut rx: mpsc::UnboundedReceiver<SubmittedJob>,
    manager: Weak<EventManager>,
    max_workers: usize,
) {
    info!(executor = %name, workers = max_workers, "Executor started");

    let semaphore = Arc::new(Semaphore::new(max_workers));
    while let Some(job) = rx.recv().await {
        if max_workers <= 1 {
            // Strict submission order within the executor.
            run_job(&name, job, &manager).await;
        } else {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let name = name.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_job(&name, job, &manager).await;
            });
        }
    }

    info!(executor = %name, "Executor stopped");
}

async fn run_job(name: &str, job: SubmittedJob, manager: &Weak<EventManager>) {
    let SubmittedJob {
        event,
        emitter,
        cancel,
        work,
    } = job;

    let result = if cancel.is_cancelled() {
        Ok(Vec::new())
    } else {
        tokio::select! {
            _ = cancel.cancelled() => Ok(Vec::new()),
            result = work => result,
        }
    };

    // Errors stop at the worker boundary: log and yield nothing.
    let outputs = match result {
        Ok(outputs) => outputs,
        Err(e) => {
            error!(executor = %name, error = %e, "Worker failed, yielding no result");
            Vec::new()
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager
            .on_complete(event, emitter, outputs, cancel.is_cancelled())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ItemKind;

    fn content(imdb: Option<&str>, tmdb: Option<&str>) -> ContentItem {
        ContentItem {
            imdb_id: imdb.map(String::from),
            tmdb_id: tmdb.map(String::from),
            tvdb_id: None,
            kind: Some(ItemKind::Movie),
            requested_by: "test".into(),
        }
    }

    #[test]
    fn content_dedupe_matches_any_external_id() {
        let queued = vec![Event::for_content(
            Emitter::Provider("inbox".into()),
            content(Some("tt0133093"), Some("603")),
        )];

        assert!(content_matches(
            &content(Some("tt0133093"), None),
            queued.iter()
        ));
        assert!(content_matches(&content(None, Some("603")), queued.iter()));
        assert!(!content_matches(
            &content(Some("tt0000001"), Some("999")),
            queued.iter()
        ));
    }

    #[test]
    fn content_without_ids_never_matches() {
        let queued = vec![Event::for_content(
            Emitter::Provider("inbox".into()),
            content(Some("tt0133093"), None),
        )];
        assert!(!content_matches(&content(None, None), queued.iter()));
    }

    #[test]
    fn max_workers_defaults_to_one() {
        assert_eq!(executor_max_workers("NoSuchService"), 1);
    }
}
