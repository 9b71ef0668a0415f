//! State-transition routing
//!
//! A pure function from an item's current state (plus the emitter that
//! produced the event) to the next worker. Side effects live in the workers
//! and the store; this module only decides where an event goes next.

use chrono::NaiveDateTime;

use crate::events::Emitter;
use crate::media::{ContentItem, ItemKind, ItemSnapshot, MediaState};
use crate::services::ServiceKind;

/// What to submit to the chosen worker.
#[derive(Debug, Clone)]
pub enum Submission {
    Item(i64),
    Content(ContentItem),
}

/// The routing decision for one event.
#[derive(Debug, Clone)]
pub enum Routing {
    /// Dispatch the submissions to this worker.
    Dispatch {
        service: ServiceKind,
        submissions: Vec<Submission>,
    },
    /// Re-enqueue these children so each re-enters the state machine
    /// independently.
    FanOut { item_ids: Vec<i64> },
    /// Terminal for now; nothing to do.
    Done,
}

/// Gate results computed by the caller before routing. Keeping them as
/// plain booleans keeps this function free of settings and clock lookups.
#[derive(Debug, Clone, Copy)]
pub struct Gates {
    /// Outcome of the scraping gate for this item.
    pub can_scrape: bool,
    /// Whether post-processing is enabled at all.
    pub post_processing: bool,
    /// Whether this item has post-processing work left (e.g. missing
    /// subtitles).
    pub should_post_process: bool,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            can_scrape: true,
            post_processing: false,
            should_post_process: false,
        }
    }
}

/// Route a content-only event (no database id yet).
///
/// `existing` is the persisted item matching the content's external ids, if
/// any: an already-completed match short-circuits the request.
pub fn route_content(
    existing: Option<&ItemSnapshot>,
    content: &ContentItem,
) -> Routing {
    if let Some(existing) = existing {
        if existing.state == MediaState::Completed {
            return Routing::Done;
        }
    }

    // Seasons are not top-level requests; a season request stands in for
    // its show.
    let mut submission = content.clone();
    if submission.kind == Some(ItemKind::Season) {
        submission.kind = Some(ItemKind::Show);
    }

    Routing::Dispatch {
        service: ServiceKind::Indexer,
        submissions: vec![Submission::Content(submission)],
    }
}

/// Route an event for a persisted item. First match wins, mirroring the
/// lifecycle order.
pub fn route_item(
    snapshot: &ItemSnapshot,
    emitter: &Emitter,
    gates: &Gates,
    now: NaiveDateTime,
) -> Routing {
    match snapshot.state {
        MediaState::Requested => {
            // A season arriving from a content source stands in for its
            // show; everything else re-indexes as itself.
            if emitter.is_content_source() && snapshot.kind == ItemKind::Season {
                if let Some(parent_id) = snapshot.parent_id {
                    return Routing::Dispatch {
                        service: ServiceKind::Indexer,
                        submissions: vec![Submission::Item(parent_id)],
                    };
                }
            }
            Routing::Dispatch {
                service: ServiceKind::Indexer,
                submissions: vec![Submission::Item(snapshot.id)],
            }
        }

        MediaState::Indexed => {
            if gates.can_scrape {
                Routing::Dispatch {
                    service: ServiceKind::Scraper,
                    submissions: vec![Submission::Item(snapshot.id)],
                }
            } else {
                Routing::Done
            }
        }

        MediaState::Scraped => Routing::Dispatch {
            service: ServiceKind::Downloader,
            submissions: vec![Submission::Item(snapshot.id)],
        },

        MediaState::Downloaded => Routing::Dispatch {
            service: ServiceKind::Symlinker,
            submissions: vec![Submission::Item(snapshot.id)],
        },

        MediaState::Symlinked => Routing::Dispatch {
            service: ServiceKind::Updater,
            submissions: vec![Submission::Item(snapshot.id)],
        },

        MediaState::Completed => {
            // A manual retry or a finished post-processing pass must not
            // loop the item back in.
            if matches!(
                emitter,
                Emitter::Manual | Emitter::Service(ServiceKind::PostProcessor)
            ) {
                return Routing::Done;
            }
            if gates.post_processing && gates.should_post_process {
                Routing::Dispatch {
                    service: ServiceKind::PostProcessor,
                    submissions: vec![Submission::Item(snapshot.id)],
                }
            } else {
                Routing::Done
            }
        }

        MediaState::Ongoing | MediaState::PartiallyCompleted => {
            if !matches!(snapshot.kind, ItemKind::Show | ItemKind::Season) {
                return Routing::Done;
            }
            let item_ids: Vec<i64> = snapshot
                .children
                .iter()
                .filter(|c| c.state != MediaState::Completed)
                .filter(|c| c.aired_at.is_some_and(|a| a <= now))
                .map(|c| c.id)
                .collect();
            if item_ids.is_empty() {
                Routing::Done
            } else {
                Routing::FanOut { item_ids }
            }
        }

        // Paused and Unreleased park the item until an explicit unpause or
        // the release monitor schedules it; Failed and Unknown are sticky.
        MediaState::Paused
        | MediaState::Unreleased
        | MediaState::Failed
        | MediaState::Unknown => Routing::Done,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, Local};

    use super::*;
    use crate::media::item::ChildView;

    fn snapshot(kind: ItemKind, state: MediaState) -> ItemSnapshot {
        ItemSnapshot {
            id: 1,
            kind,
            state,
            parent_id: None,
            indexed_at: None,
            aired_at: None,
            scraped_at: None,
            scraped_times: 0,
            children: Vec::new(),
        }
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    #[test]
    fn happy_path_routes_through_every_worker() {
        let gates = Gates::default();
        let expectations = [
            (MediaState::Requested, ServiceKind::Indexer),
            (MediaState::Indexed, ServiceKind::Scraper),
            (MediaState::Scraped, ServiceKind::Downloader),
            (MediaState::Downloaded, ServiceKind::Symlinker),
            (MediaState::Symlinked, ServiceKind::Updater),
        ];
        for (state, expected) in expectations {
            let snap = snapshot(ItemKind::Movie, state);
            let routing = route_item(&snap, &Emitter::Scheduler, &gates, now());
            assert_matches!(routing, Routing::Dispatch { service, .. } if service == expected);
        }
    }

    #[test]
    fn closed_scrape_gate_parks_indexed_items() {
        let snap = snapshot(ItemKind::Movie, MediaState::Indexed);
        let gates = Gates {
            can_scrape: false,
            ..Gates::default()
        };
        assert_matches!(
            route_item(&snap, &Emitter::Scheduler, &gates, now()),
            Routing::Done
        );
    }

    #[test]
    fn completed_items_never_renotify_for_manual_or_postprocessor() {
        let snap = snapshot(ItemKind::Movie, MediaState::Completed);
        let gates = Gates {
            post_processing: true,
            should_post_process: true,
            ..Gates::default()
        };

        assert_matches!(route_item(&snap, &Emitter::Manual, &gates, now()), Routing::Done);
        assert_matches!(
            route_item(
                &snap,
                &Emitter::Service(ServiceKind::PostProcessor),
                &gates,
                now()
            ),
            Routing::Done
        );
        assert_matches!(
            route_item(&snap, &Emitter::Service(ServiceKind::Updater), &gates, now()),
            Routing::Dispatch {
                service: ServiceKind::PostProcessor,
                ..
            }
        );
    }

    #[test]
    fn completed_without_postprocessing_is_terminal() {
        let snap = snapshot(ItemKind::Movie, MediaState::Completed);
        assert_matches!(
            route_item(&snap, &Emitter::Scheduler, &Gates::default(), now()),
            Routing::Done
        );
    }

    #[test]
    fn ongoing_shows_fan_out_to_released_incomplete_children() {
        let reference = now();
        let mut snap = snapshot(ItemKind::Show, MediaState::Ongoing);
        snap.children = vec![
            ChildView {
                id: 10,
                state: MediaState::Completed,
                aired_at: Some(reference - Duration::days(14)),
            },
            ChildView {
                id: 11,
                state: MediaState::Indexed,
                aired_at: Some(reference - Duration::days(7)),
            },
            ChildView {
                id: 12,
                state: MediaState::Unreleased,
                aired_at: Some(reference + Duration::days(7)),
            },
        ];

        let routing = route_item(&snap, &Emitter::Scheduler, &Gates::default(), reference);
        assert_matches!(routing, Routing::FanOut { item_ids } if item_ids == vec![11]);
    }

    #[test]
    fn parked_states_are_terminal() {
        for state in [
            MediaState::Paused,
            MediaState::Unreleased,
            MediaState::Failed,
            MediaState::Unknown,
        ] {
            let snap = snapshot(ItemKind::Movie, state);
            assert_matches!(
                route_item(&snap, &Emitter::Scheduler, &Gates::default(), now()),
                Routing::Done
            );
        }
    }

    #[test]
    fn season_requests_from_content_substitute_the_show() {
        let mut snap = snapshot(ItemKind::Season, MediaState::Requested);
        snap.parent_id = Some(99);

        let routing = route_item(
            &snap,
            &Emitter::Provider("watchlist".into()),
            &Gates::default(),
            now(),
        );
        assert_matches!(
            routing,
            Routing::Dispatch { service: ServiceKind::Indexer, submissions }
                if matches!(submissions.as_slice(), [Submission::Item(99)])
        );

        // From a worker the season indexes as itself.
        let routing = route_item(
            &snap,
            &Emitter::Service(ServiceKind::Indexer),
            &Gates::default(),
            now(),
        );
        assert_matches!(
            routing,
            Routing::Dispatch { submissions, .. }
                if matches!(submissions.as_slice(), [Submission::Item(1)])
        );
    }

    #[test]
    fn completed_duplicates_short_circuit_content_requests() {
        let existing = snapshot(ItemKind::Movie, MediaState::Completed);
        let content = ContentItem {
            imdb_id: Some("tt0133093".into()),
            ..ContentItem::default()
        };
        assert_matches!(route_content(Some(&existing), &content), Routing::Done);

        let incomplete = snapshot(ItemKind::Movie, MediaState::Downloaded);
        assert_matches!(
            route_content(Some(&incomplete), &content),
            Routing::Dispatch { service: ServiceKind::Indexer, .. }
        );
    }

    #[test]
    fn content_season_requests_become_show_requests() {
        let content = ContentItem {
            tvdb_id: Some("81189".into()),
            kind: Some(ItemKind::Season),
            ..ContentItem::default()
        };
        let routing = route_content(None, &content);
        assert_matches!(
            routing,
            Routing::Dispatch { submissions, .. }
                if matches!(&submissions[..], [Submission::Content(ci)] if ci.kind == Some(ItemKind::Show))
        );
    }
}
