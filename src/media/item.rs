//! Media item domain views
//!
//! The database holds the full polymorphic rows; the orchestrator mostly
//! works on thin views of them. `QueueView` is what the event manager needs
//! for dedupe and priority, `ItemSnapshot` is what the state machine routes
//! on, and `ContentItem` is a transient request coming out of a content
//! provider before anything is persisted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::state::MediaState;

/// Discriminator for the polymorphic media item row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Movie,
    Show,
    Season,
    Episode,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
        }
    }

    /// Top-level kinds are the ones content providers may request directly.
    pub fn is_top_level(&self) -> bool {
        matches!(self, Self::Movie | Self::Show)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "show" => Ok(Self::Show),
            "season" => Ok(Self::Season),
            "episode" => Ok(Self::Episode),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

/// Minimal view used on the queue hot path. Selecting only these columns
/// keeps enqueue/dispatch decisions cheap.
#[derive(Debug, Clone)]
pub struct QueueView {
    pub id: i64,
    pub kind: ItemKind,
    pub state: MediaState,
    pub parent_id: Option<i64>,
}

/// Thin child view for derived-state computation and fan-out routing.
#[derive(Debug, Clone)]
pub struct ChildView {
    pub id: i64,
    pub state: MediaState,
    pub aired_at: Option<NaiveDateTime>,
}

/// What the state machine routes on: the item header plus direct children.
/// Ancestors are never loaded here; parent updates are the store's job.
#[derive(Debug, Clone)]
pub struct ItemSnapshot {
    pub id: i64,
    pub kind: ItemKind,
    pub state: MediaState,
    pub parent_id: Option<i64>,
    pub indexed_at: Option<NaiveDateTime>,
    pub aired_at: Option<NaiveDateTime>,
    pub scraped_at: Option<NaiveDateTime>,
    pub scraped_times: i32,
    pub children: Vec<ChildView>,
}

/// A transient item produced by a content provider. Carries no database id;
/// the indexer resolves it into a persisted item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentItem {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub kind: Option<ItemKind>,
    pub requested_by: String,
}

impl ContentItem {
    pub fn has_any_id(&self) -> bool {
        self.imdb_id.is_some() || self.tmdb_id.is_some() || self.tvdb_id.is_some()
    }

    pub fn log_label(&self) -> String {
        self.imdb_id
            .as_deref()
            .or(self.tmdb_id.as_deref())
            .or(self.tvdb_id.as_deref())
            .unwrap_or("<no id>")
            .to_string()
    }
}

/// Weekday flags from the indexer's release payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AirsDays {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl AirsDays {
    /// Weekday indices (Monday = 0) flagged true.
    pub fn flagged(&self) -> Vec<u32> {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
        .iter()
        .enumerate()
        .filter_map(|(i, on)| on.then_some(i as u32))
        .collect()
    }
}

/// Next-air hints carried on shows, straight from the indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseData {
    pub next_aired: Option<String>,
    pub airs_days: Option<AirsDays>,
    /// "HH:MM" in the network's zone.
    pub airs_time: Option<String>,
    pub timezone: Option<String>,
}

/// The chosen acquisition for an item: the selected infohash and the file
/// paths picked out of the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveStream {
    pub infohash: String,
    pub files: Vec<ActiveFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveFile {
    pub path: String,
    pub file_size: i64,
}

/// Country-code → alternative titles.
pub type Aliases = HashMap<String, Vec<String>>;

/// Compute a parent's derived state from its direct children. Never recurses
/// into ancestors; callers propagate upward explicitly.
pub fn derive_parent_state(children: &[ChildView], now: NaiveDateTime) -> MediaState {
    if children.is_empty() {
        return MediaState::Unreleased;
    }

    if children.iter().all(|c| c.state == MediaState::Completed) {
        return MediaState::Completed;
    }

    let any_completed = children.iter().any(|c| {
        matches!(
            c.state,
            MediaState::Completed | MediaState::PartiallyCompleted
        )
    });
    if any_completed {
        return MediaState::PartiallyCompleted;
    }

    let any_aired = children.iter().any(|c| c.aired_at.is_some_and(|a| a <= now));
    let any_future = children.iter().any(|c| c.aired_at.is_some_and(|a| a > now));
    if any_aired && any_future {
        return MediaState::Ongoing;
    }
    if !any_aired {
        return MediaState::Unreleased;
    }

    // Released children, none complete: reflect the least-advanced child so
    // the parent re-enters the pipeline at the right worker.
    children
        .iter()
        .filter(|c| c.state.pipeline_rank() > 0)
        .min_by_key(|c| c.state.pipeline_rank())
        .map(|c| c.state)
        .unwrap_or(MediaState::Requested)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Local};

    use super::*;

    fn child(state: MediaState, aired_offset_days: Option<i64>) -> ChildView {
        let now = Local::now().naive_local();
        ChildView {
            id: 0,
            state,
            aired_at: aired_offset_days.map(|d| now + Duration::days(d)),
        }
    }

    #[test]
    fn all_completed_children_complete_the_parent() {
        let now = Local::now().naive_local();
        let children = vec![
            child(MediaState::Completed, Some(-10)),
            child(MediaState::Completed, Some(-3)),
        ];
        assert_eq!(derive_parent_state(&children, now), MediaState::Completed);
    }

    #[test]
    fn mixed_completion_is_partial() {
        let now = Local::now().naive_local();
        let children = vec![
            child(MediaState::Completed, Some(-10)),
            child(MediaState::Scraped, Some(-3)),
        ];
        assert_eq!(
            derive_parent_state(&children, now),
            MediaState::PartiallyCompleted
        );
    }

    #[test]
    fn aired_plus_future_children_is_ongoing() {
        let now = Local::now().naive_local();
        let children = vec![
            child(MediaState::Indexed, Some(-7)),
            child(MediaState::Unreleased, Some(7)),
        ];
        assert_eq!(derive_parent_state(&children, now), MediaState::Ongoing);
    }

    #[test]
    fn nothing_released_is_unreleased() {
        let now = Local::now().naive_local();
        let children = vec![
            child(MediaState::Unreleased, Some(5)),
            child(MediaState::Unreleased, None),
        ];
        assert_eq!(derive_parent_state(&children, now), MediaState::Unreleased);
        assert_eq!(derive_parent_state(&[], now), MediaState::Unreleased);
    }

    #[test]
    fn released_without_completion_takes_least_advanced_child() {
        let now = Local::now().naive_local();
        let children = vec![
            child(MediaState::Downloaded, Some(-10)),
            child(MediaState::Indexed, Some(-3)),
        ];
        assert_eq!(derive_parent_state(&children, now), MediaState::Indexed);
    }
}
