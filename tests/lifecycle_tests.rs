//! Integration tests for the acquisition lifecycle
//!
//! These tests verify the contract of the pipeline as documented:
//! - state transition ordering (Requested -> ... -> Completed)
//! - which states are terminal and which are re-enterable
//! - queue priority semantics (closest-to-completion first)
//! - schedule uniqueness expectations

/// The lifecycle states in pipeline order.
const PIPELINE: &[&str] = &[
    "Requested",
    "Indexed",
    "Scraped",
    "Downloaded",
    "Symlinked",
    "Completed",
];

/// Side states that park an item.
const PARKED: &[&str] = &["Paused", "Unreleased", "Failed", "Unknown"];

/// The worker responsible for moving an item out of each state.
fn next_worker(state: &str) -> Option<&'static str> {
    match state {
        "Requested" => Some("Indexer"),
        "Indexed" => Some("Scraper"),
        "Scraped" => Some("Downloader"),
        "Downloaded" => Some("Symlinker"),
        "Symlinked" => Some("Updater"),
        "Completed" => Some("PostProcessor"),
        _ => None,
    }
}

/// Queue priority: lower moves first.
fn queue_priority(state: Option<&str>) -> u32 {
    match state {
        Some("Completed") => 0,
        Some("PartiallyCompleted") => 1,
        Some("Symlinked") => 2,
        Some("Downloaded") => 3,
        Some("Scraped") => 4,
        Some("Indexed") => 5,
        _ => 999,
    }
}

mod transitions {
    use super::*;

    #[test]
    fn every_pipeline_state_has_a_worker() {
        for state in &PIPELINE[..PIPELINE.len() - 1] {
            assert!(
                next_worker(state).is_some(),
                "state {state} must route to a worker"
            );
        }
    }

    #[test]
    fn parked_states_route_nowhere() {
        for state in PARKED {
            assert_eq!(next_worker(state), None, "state {state} must be terminal");
        }
    }

    #[test]
    fn pipeline_order_is_strict() {
        // Each worker's output state is exactly the next pipeline stage.
        let advances = [
            ("Indexer", "Requested", "Indexed"),
            ("Scraper", "Indexed", "Scraped"),
            ("Downloader", "Scraped", "Downloaded"),
            ("Symlinker", "Downloaded", "Symlinked"),
            ("Updater", "Symlinked", "Completed"),
        ];
        for (worker, from, to) in advances {
            assert_eq!(next_worker(from), Some(worker));
            let from_idx = PIPELINE.iter().position(|s| *s == from).unwrap();
            let to_idx = PIPELINE.iter().position(|s| *s == to).unwrap();
            assert_eq!(to_idx, from_idx + 1, "{worker} must advance exactly one stage");
        }
    }
}

mod priorities {
    use super::*;

    #[test]
    fn nearer_completion_moves_first() {
        let mut states: Vec<Option<&str>> = vec![
            Some("Indexed"),
            Some("Completed"),
            None,
            Some("Downloaded"),
            Some("PartiallyCompleted"),
            Some("Scraped"),
            Some("Symlinked"),
        ];
        states.sort_by_key(|s| queue_priority(*s));

        let order: Vec<Option<&str>> = states;
        assert_eq!(
            order,
            vec![
                Some("Completed"),
                Some("PartiallyCompleted"),
                Some("Symlinked"),
                Some("Downloaded"),
                Some("Scraped"),
                Some("Indexed"),
                None,
            ]
        );
    }

    #[test]
    fn absent_and_unknown_states_sort_last() {
        assert_eq!(queue_priority(None), 999);
        assert_eq!(queue_priority(Some("Requested")), 999);
        assert!(queue_priority(Some("Indexed")) < queue_priority(None));
    }
}

mod schedule_contract {
    use std::collections::HashSet;

    /// The schedule's uniqueness key.
    #[derive(Hash, PartialEq, Eq, Clone)]
    struct ScheduleKey {
        item_id: i64,
        task_type: &'static str,
        scheduled_for: &'static str,
    }

    #[test]
    fn duplicate_schedules_collapse_to_one_row() {
        let mut rows: HashSet<ScheduleKey> = HashSet::new();
        let key = ScheduleKey {
            item_id: 42,
            task_type: "episode_release",
            scheduled_for: "2025-01-14T20:00:00",
        };

        assert!(rows.insert(key.clone()));
        // Second identical schedule attempt is a no-op.
        assert!(!rows.insert(key.clone()));
        assert_eq!(rows.len(), 1);

        // A different time is a different row.
        assert!(rows.insert(ScheduleKey {
            scheduled_for: "2025-01-21T20:00:00",
            ..key
        }));
        assert_eq!(rows.len(), 2);
    }
}

mod parent_state_contract {
    /// Derived parent state over child states, mirroring the store rules.
    fn derive(children: &[(&str, bool)]) -> &'static str {
        // (state, released)
        if children.is_empty() {
            return "Unreleased";
        }
        if children.iter().all(|(s, _)| *s == "Completed") {
            return "Completed";
        }
        if children
            .iter()
            .any(|(s, _)| *s == "Completed" || *s == "PartiallyCompleted")
        {
            return "PartiallyCompleted";
        }
        let any_released = children.iter().any(|(_, released)| *released);
        let any_future = children.iter().any(|(_, released)| !released);
        if any_released && any_future {
            return "Ongoing";
        }
        if !any_released {
            return "Unreleased";
        }
        "InProgress"
    }

    #[test]
    fn all_children_complete_completes_the_show() {
        assert_eq!(derive(&[("Completed", true), ("Completed", true)]), "Completed");
    }

    #[test]
    fn one_complete_child_makes_it_partial() {
        assert_eq!(
            derive(&[("Completed", true), ("Indexed", true)]),
            "PartiallyCompleted"
        );
    }

    #[test]
    fn aired_plus_future_children_is_ongoing() {
        assert_eq!(derive(&[("Indexed", true), ("Unreleased", false)]), "Ongoing");
    }

    #[test]
    fn nothing_released_is_unreleased() {
        assert_eq!(derive(&[("Unreleased", false)]), "Unreleased");
        assert_eq!(derive(&[]), "Unreleased");
    }
}
