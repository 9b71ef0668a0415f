//! Top-level program wiring
//!
//! Owns the configuration, the database, the event manager, the worker
//! services and the scheduler, and runs the dispatch loop that routes
//! popped events through the state machine to the right executor. All
//! dependencies are passed explicitly; there are no module-level singletons.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheConfig, ChunkCache, EvictionPolicy};
use crate::config::{Config, SettingsManager};
use crate::db::Database;
use crate::events::manager::{EventManager, SubmittedJob, WorkFuture};
use crate::events::{Emitter, Event};
use crate::media::{ContentItem, ItemSnapshot};
use crate::scheduler;
use crate::services::content::{
    ContentProvider, ListSyncProvider, RequestInboxProvider, WatchlistProvider,
};
use crate::services::downloader::DownloaderService;
use crate::services::indexer::IndexerService;
use crate::services::post_processor::PostProcessorService;
use crate::services::scraper::{ScraperService, can_we_scrape};
use crate::services::symlinker::SymlinkerService;
use crate::services::updater::UpdaterService;
use crate::services::{ServiceKind, WorkerOutput};
use crate::state_machine::{Gates, Routing, Submission, route_content, route_item};

const IDLE_SLEEP: Duration = Duration::from_millis(500);

/// All worker services, built from one settings snapshot. Rebuilt wholesale
/// when settings change.
pub struct Services {
    pub indexer: IndexerService,
    pub scraper: ScraperService,
    pub downloader: DownloaderService,
    pub symlinker: Arc<SymlinkerService>,
    pub updater: UpdaterService,
    pub post_processor: PostProcessorService,
    /// Providers that validated at initialization.
    pub providers: Vec<Arc<dyn ContentProvider>>,
}

impl Services {
    pub async fn initialize(db: Database, settings: &crate::config::AppSettings) -> Self {
        let indexer = IndexerService::new(db.clone(), &settings.indexer);
        let scraper = ScraperService::new(db.clone(), settings.scraping.clone());
        let downloader = DownloaderService::new(db.clone(), settings.downloader.clone()).await;
        let symlinker = Arc::new(SymlinkerService::new(db.clone(), settings.symlink.clone()));
        let updater = UpdaterService::new(db.clone(), settings.updater.clone());
        let post_processor = PostProcessorService::new(db.clone(), settings.subtitles.clone());

        let candidates: Vec<Arc<dyn ContentProvider>> = vec![
            Arc::new(RequestInboxProvider::new(settings.content.request_inbox.clone())),
            Arc::new(WatchlistProvider::new(settings.content.watchlist.clone())),
            Arc::new(ListSyncProvider::new(settings.content.lists.clone())),
        ];
        let mut providers = Vec::new();
        for provider in candidates {
            if provider.validate().await {
                info!(provider = provider.key(), "Content provider initialized");
                providers.push(provider);
            }
        }

        if providers.is_empty() {
            error!("No content provider initialized, you must enable at least one");
        }
        if !scraper.initialized() {
            error!("No scraper aggregator configured, you must set one");
        }
        if !downloader.initialized() {
            error!("No downloader provider initialized, you must enable at least one");
        }
        if !updater.initialized() {
            error!("No library updater configured, you must set one");
        }

        Self {
            indexer,
            scraper,
            downloader,
            symlinker,
            updater,
            post_processor,
            providers,
        }
    }

    /// All required services up. The program idles until this holds.
    pub fn validate(&self) -> bool {
        !self.providers.is_empty()
            && self.indexer.initialized()
            && self.scraper.initialized()
            && self.downloader.initialized()
            && self.symlinker.initialized()
            && self.updater.initialized()
    }
}

pub struct Program {
    pub config: Config,
    pub settings: Arc<SettingsManager>,
    pub db: Database,
    pub em: Arc<EventManager>,
    pub cache: Arc<ChunkCache>,
    services: RwLock<Option<Arc<Services>>>,
    scheduler: Mutex<Option<JobScheduler>>,
    running: AtomicBool,
}

impl Program {
    pub async fn new(config: Config, db: Database) -> Result<Arc<Self>> {
        let settings = Arc::new(
            SettingsManager::load_or_default(&config.settings_file())
                .context("loading settings")?,
        );
        settings.get().validate().context("validating settings")?;

        let cache_settings = settings.get().cache;
        let cache = ChunkCache::new(CacheConfig {
            cache_dir: config.cache_dir(),
            max_size_bytes: cache_settings.max_size_bytes,
            ttl_seconds: cache_settings.ttl_seconds,
            eviction: if cache_settings.eviction == "TTL" {
                EvictionPolicy::Ttl
            } else {
                EvictionPolicy::Lru
            },
            metrics_enabled: true,
        })
        .await
        .context("opening chunk cache")?;

        let em = EventManager::new(db.clone());

        Ok(Arc::new(Self {
            config,
            settings,
            db,
            em,
            cache: Arc::new(cache),
            services: RwLock::new(None),
            scheduler: Mutex::new(None),
            running: AtomicBool::new(false),
        }))
    }

    pub fn services(&self) -> Option<Arc<Services>> {
        self.services.read().clone()
    }

    /// Build (or rebuild) the worker services from the current settings.
    /// Called at startup and whenever the settings tree is mutated.
    pub async fn reinitialize(&self) {
        let services = Services::initialize(self.db.clone(), &self.settings.get()).await;
        *self.services.write() = Some(Arc::new(services));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initialize services, log the library, start the scheduler and the
    /// dispatch loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.reinitialize().await;
        self.log_library_counts().await;

        self.running.store(true, Ordering::SeqCst);

        let scheduler = scheduler::start(self.clone()).await?;
        *self.scheduler.lock() = Some(scheduler);

        let program = self.clone();
        tokio::spawn(async move {
            program.dispatch_loop().await;
        });

        info!("Orchestrator is running");
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.scheduler.lock().take();
        if let Some(mut scheduler) = scheduler {
            if let Err(e) = scheduler.shutdown().await {
                warn!(error = %e, "Scheduler shutdown failed");
            }
        }
        info!("Orchestrator stopped");
    }

    async fn log_library_counts(&self) {
        match self.db.media_items().counts().await {
            Ok(counts) => {
                for (kind, count) in counts {
                    info!(kind = %kind, count, "Library contents");
                }
            }
            Err(e) => warn!(error = %e, "Could not count library items"),
        }
    }

    /// The event-dispatch loop: pop, route, submit. Non-blocking apart from
    /// a bounded sleep when nothing is eligible.
    async fn dispatch_loop(self: Arc<Self>) {
        info!("Dispatch loop started");
        while self.is_running() {
            let Some(services) = self.services() else {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };
            if !services.validate() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            match self.em.pop_ready() {
                Some(event) => {
                    if let Err(e) = self.process_event(event, &services).await {
                        error!(error = %e, "Event processing failed");
                    }
                }
                None => {
                    self.cache.maybe_log_stats().await;
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
        info!("Dispatch loop stopped");
    }

    /// Route one popped event and submit the outcome.
    async fn process_event(&self, event: Event, services: &Arc<Services>) -> Result<()> {
        let routing = if let Some(item_id) = event.item_id {
            let Some(snapshot) = self.db.media_items().snapshot(item_id).await? else {
                warn!(item_id, "Popped event for a vanished item");
                return Ok(());
            };
            let gates = self.gates_for(&snapshot, services).await;
            route_item(&snapshot, &event.emitted_by, &gates, Local::now().naive_local())
        } else if let Some(content) = &event.content_item {
            let existing = self.existing_snapshot(content).await?;
            route_content(existing.as_ref(), content)
        } else {
            return Ok(());
        };

        match routing {
            Routing::Dispatch {
                service,
                submissions,
            } => {
                for submission in submissions {
                    self.submit_to_worker(service, submission, &event, services);
                }
            }
            Routing::FanOut { item_ids } => {
                for id in item_ids {
                    self.em
                        .add_event(Event::for_item(event.emitted_by.clone(), id))
                        .await;
                }
            }
            Routing::Done => {
                debug!(event = %event.log_label(), "No further processing");
            }
        }
        Ok(())
    }

    async fn gates_for(&self, snapshot: &ItemSnapshot, services: &Arc<Services>) -> Gates {
        let now = Local::now().naive_local();
        Gates {
            can_scrape: can_we_scrape(snapshot, services.scraper.settings(), now),
            post_processing: services.post_processor.enabled(),
            should_post_process: services.post_processor.should_submit(snapshot.id).await,
        }
    }

    async fn existing_snapshot(&self, content: &ContentItem) -> Result<Option<ItemSnapshot>> {
        let repo = self.db.media_items();
        let Some(id) = repo
            .find_by_external_ids(
                content.imdb_id.as_deref(),
                content.tmdb_id.as_deref(),
                content.tvdb_id.as_deref(),
            )
            .await?
        else {
            return Ok(None);
        };
        repo.snapshot(id).await
    }

    /// Mark the submission running and hand it to the worker's executor.
    fn submit_to_worker(
        &self,
        service: ServiceKind,
        submission: Submission,
        origin: &Event,
        services: &Arc<Services>,
    ) {
        let cancel = CancellationToken::new();
        let running_event = match &submission {
            Submission::Item(id) => Event::for_item(origin.emitted_by.clone(), *id),
            Submission::Content(ci) => Event::for_content(origin.emitted_by.clone(), ci.clone()),
        };
        self.em.mark_running(running_event.clone(), cancel.clone());

        let work = make_work(services.clone(), service, submission, cancel.clone());
        self.em.submit(
            service.as_str(),
            SubmittedJob {
                event: Some(running_event),
                emitter: Emitter::Service(service),
                cancel,
                work,
            },
        );
    }

    /// Submit a content provider poll as a normal job on the provider's own
    /// executor. Called by the scheduler.
    pub fn submit_provider_poll(&self, provider: Arc<dyn ContentProvider>) {
        let key = provider.key();
        let cancel = CancellationToken::new();
        let work: WorkFuture = Box::pin(async move {
            let items = provider.run().await?;
            Ok(items.into_iter().map(WorkerOutput::Content).collect())
        });
        self.em.submit(
            key,
            SubmittedJob {
                event: None,
                emitter: Emitter::Provider(key.to_string()),
                cancel,
                work,
            },
        );
    }
}

fn make_work(
    services: Arc<Services>,
    service: ServiceKind,
    submission: Submission,
    cancel: CancellationToken,
) -> WorkFuture {
    Box::pin(async move {
        match (service, submission) {
            (ServiceKind::Indexer, Submission::Content(content)) => {
                services.indexer.run_for_content(&content, &cancel).await
            }
            (ServiceKind::Indexer, Submission::Item(id)) => {
                services.indexer.run_for_item(id, &cancel).await
            }
            (ServiceKind::Scraper, Submission::Item(id)) => {
                services.scraper.run_for_item(id, &cancel).await
            }
            (ServiceKind::Downloader, Submission::Item(id)) => {
                services.downloader.run_for_item(id, &cancel).await
            }
            (ServiceKind::Symlinker, Submission::Item(id)) => {
                services.symlinker.run_for_item(id, &cancel).await
            }
            (ServiceKind::Updater, Submission::Item(id)) => {
                services.updater.run_for_item(id, &cancel).await
            }
            (ServiceKind::PostProcessor, Submission::Item(id)) => {
                services.post_processor.run_for_item(id, &cancel).await
            }
            (service, submission) => {
                warn!(service = %service, ?submission, "Unroutable submission");
                Ok(Vec::new())
            }
        }
    })
}
