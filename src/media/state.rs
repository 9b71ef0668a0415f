//! Lifecycle states and queue priority mapping

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a media item.
///
/// The happy path runs Requested → Indexed → Scraped → Downloaded →
/// Symlinked → Completed. The remaining states are side states that either
/// park an item (Paused, Failed, Unreleased) or describe a partially
/// advanced parent (PartiallyCompleted, Ongoing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaState {
    Unknown,
    Requested,
    Indexed,
    Scraped,
    Downloaded,
    Symlinked,
    Completed,
    PartiallyCompleted,
    Ongoing,
    Unreleased,
    Paused,
    Failed,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Requested => "Requested",
            Self::Indexed => "Indexed",
            Self::Scraped => "Scraped",
            Self::Downloaded => "Downloaded",
            Self::Symlinked => "Symlinked",
            Self::Completed => "Completed",
            Self::PartiallyCompleted => "PartiallyCompleted",
            Self::Ongoing => "Ongoing",
            Self::Unreleased => "Unreleased",
            Self::Paused => "Paused",
            Self::Failed => "Failed",
        }
    }

    /// Queue priority for the event queue. Lower sorts first; items closest
    /// to completion progress first to smooth tail latency.
    pub fn queue_priority(&self) -> u32 {
        match self {
            Self::Completed => 0,
            Self::PartiallyCompleted => 1,
            Self::Symlinked => 2,
            Self::Downloaded => 3,
            Self::Scraped => 4,
            Self::Indexed => 5,
            _ => 999,
        }
    }

    /// States that block descendants from being queued while an ancestor
    /// holds them.
    pub fn blocks_children(&self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }

    /// Rank along the acquisition pipeline, used when deriving a parent
    /// state from mixed children. Side states rank lowest.
    pub fn pipeline_rank(&self) -> u32 {
        match self {
            Self::Requested => 1,
            Self::Indexed => 2,
            Self::Scraped => 3,
            Self::Downloaded => 4,
            Self::Symlinked => 5,
            Self::Completed => 6,
            _ => 0,
        }
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Requested" => Self::Requested,
            "Indexed" => Self::Indexed,
            "Scraped" => Self::Scraped,
            "Downloaded" => Self::Downloaded,
            "Symlinked" => Self::Symlinked,
            "Completed" => Self::Completed,
            "PartiallyCompleted" => Self::PartiallyCompleted,
            "Ongoing" => Self::Ongoing,
            "Unreleased" => Self::Unreleased,
            "Paused" => Self::Paused,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_completion_first() {
        assert!(MediaState::Completed.queue_priority() < MediaState::Symlinked.queue_priority());
        assert!(MediaState::Symlinked.queue_priority() < MediaState::Downloaded.queue_priority());
        assert!(MediaState::Downloaded.queue_priority() < MediaState::Scraped.queue_priority());
        assert!(MediaState::Scraped.queue_priority() < MediaState::Indexed.queue_priority());
        assert_eq!(MediaState::Requested.queue_priority(), 999);
        assert_eq!(MediaState::Unknown.queue_priority(), 999);
    }

    #[test]
    fn round_trips_through_strings() {
        for state in [
            MediaState::Requested,
            MediaState::PartiallyCompleted,
            MediaState::Paused,
        ] {
            assert_eq!(state.as_str().parse::<MediaState>().unwrap(), state);
        }
        assert_eq!("garbage".parse::<MediaState>().unwrap(), MediaState::Unknown);
    }
}
