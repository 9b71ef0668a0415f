//! In-memory events and their orchestration

pub mod manager;
pub mod queue;

use std::fmt;

use chrono::{Local, NaiveDateTime};
use uuid::Uuid;

use crate::media::{ContentItem, MediaState};
use crate::services::ServiceKind;

/// The logical source of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitter {
    /// A pipeline worker that just finished.
    Service(ServiceKind),
    /// A content provider, by its key.
    Provider(String),
    Scheduler,
    RetryLibrary,
    Manual,
}

impl Emitter {
    pub fn name(&self) -> String {
        match self {
            Self::Service(kind) => kind.as_str().to_string(),
            Self::Provider(key) => key.clone(),
            Self::Scheduler => "Scheduler".to_string(),
            Self::RetryLibrary => "RetryLibrary".to_string(),
            Self::Manual => "Manual".to_string(),
        }
    }

    /// Emitters that introduce new requests rather than advance existing
    /// items.
    pub fn is_content_source(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Manual)
    }
}

impl fmt::Display for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// An in-memory unit of work: either a persisted item to advance
/// (`item_id`) or a transient discovery (`content_item`).
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub emitted_by: Emitter,
    pub item_id: Option<i64>,
    pub content_item: Option<ContentItem>,
    /// Earliest time this event may be dispatched.
    pub run_at: NaiveDateTime,
    /// Cached item state so priority sorting never touches the database.
    pub item_state: Option<MediaState>,
}

impl Event {
    pub fn for_item(emitted_by: Emitter, item_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            emitted_by,
            item_id: Some(item_id),
            content_item: None,
            run_at: Local::now().naive_local(),
            item_state: None,
        }
    }

    pub fn for_item_at(emitted_by: Emitter, item_id: i64, run_at: NaiveDateTime) -> Self {
        Self {
            run_at,
            ..Self::for_item(emitted_by, item_id)
        }
    }

    pub fn for_content(emitted_by: Emitter, content_item: ContentItem) -> Self {
        Self {
            id: Uuid::new_v4(),
            emitted_by,
            item_id: None,
            content_item: Some(content_item),
            run_at: Local::now().naive_local(),
            item_state: None,
        }
    }

    pub fn log_label(&self) -> String {
        match (self.item_id, &self.content_item) {
            (Some(id), _) => format!("item {id}"),
            (None, Some(ci)) => format!("content {}", ci.log_label()),
            (None, None) => "empty event".to_string(),
        }
    }
}
