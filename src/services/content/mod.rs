//! Content providers
//!
//! Sources of new requests. Each provider validates its configuration at
//! startup, is polled on its own schedule (or once, for push-style setups),
//! and yields transient items identified only by external ids; the indexer
//! resolves them into the library.

pub mod lists;
pub mod request_inbox;
pub mod watchlist;

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::error::CoreResult;
use crate::media::ContentItem;

pub use lists::ListSyncProvider;
pub use request_inbox::RequestInboxProvider;
pub use watchlist::WatchlistProvider;

/// The content provider surface the orchestrator consumes.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Stable key used for the emitter and the provider's executor.
    fn key(&self) -> &'static str;
    fn settings(&self) -> &ProviderSettings;
    /// Check configuration and upstream reachability.
    async fn validate(&self) -> bool;
    /// One poll: every currently requested item.
    async fn run(&self) -> CoreResult<Vec<ContentItem>>;
}
