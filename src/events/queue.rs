//! Priority event queue
//!
//! Only events whose `run_at` has passed are eligible. Among those, the pop
//! order is `(state_priority, run_at)` ascending: items closest to
//! completion move first, which smooths tail latency for nearly-done items.

use chrono::NaiveDateTime;

use super::Event;

fn priority_of(event: &Event) -> u32 {
    event.item_state.map(|s| s.queue_priority()).unwrap_or(999)
}

/// In-memory queue of pending events. Not internally synchronized; the
/// event manager guards it together with the running set.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pop the highest-priority eligible event, or `None` when nothing is
    /// ready (the caller sleeps and polls again).
    pub fn pop_next(&mut self, now: NaiveDateTime) -> Option<Event> {
        let best = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.run_at <= now)
            .min_by_key(|(_, e)| (priority_of(e), e.run_at))
            .map(|(i, _)| i)?;
        Some(self.events.remove(best))
    }

    pub fn contains_item(&self, item_id: i64) -> bool {
        self.events.iter().any(|e| e.item_id == Some(item_id))
    }

    /// Drop all queued events for the given item ids. Returns how many were
    /// removed.
    pub fn drop_items(&mut self, item_ids: &[i64]) -> usize {
        let before = self.events.len();
        self.events
            .retain(|e| !e.item_id.is_some_and(|id| item_ids.contains(&id)));
        before - self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Local};

    use super::*;
    use crate::events::Emitter;
    use crate::media::MediaState;

    fn event(item_id: i64, state: Option<MediaState>, run_offset_secs: i64) -> Event {
        let mut e = Event::for_item_at(
            Emitter::Manual,
            item_id,
            Local::now().naive_local() + Duration::seconds(run_offset_secs),
        );
        e.item_state = state;
        e
    }

    #[test]
    fn pops_by_state_priority_then_run_at() {
        let now = Local::now().naive_local();
        let mut queue = EventQueue::new();
        queue.push(event(1, Some(MediaState::Indexed), -30));
        queue.push(event(2, Some(MediaState::Symlinked), -10));
        queue.push(event(3, Some(MediaState::Downloaded), -20));
        queue.push(event(4, None, -40));

        let order: Vec<i64> = std::iter::from_fn(|| queue.pop_next(now))
            .map(|e| e.item_id.unwrap())
            .collect();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[test]
    fn pop_order_is_monotonic_in_priority_and_run_at() {
        let now = Local::now().naive_local();
        let mut queue = EventQueue::new();
        let states = [
            Some(MediaState::Scraped),
            Some(MediaState::Completed),
            None,
            Some(MediaState::Indexed),
            Some(MediaState::Scraped),
            Some(MediaState::PartiallyCompleted),
        ];
        for (i, state) in states.iter().enumerate() {
            queue.push(event(i as i64, *state, -(i as i64 + 1)));
        }

        let mut last: Option<(u32, NaiveDateTime)> = None;
        while let Some(e) = queue.pop_next(now) {
            let key = (priority_of(&e), e.run_at);
            if let Some(prev) = last {
                assert!(key >= prev, "queue popped out of order: {key:?} after {prev:?}");
            }
            last = Some(key);
        }
    }

    #[test]
    fn future_events_are_not_eligible() {
        let now = Local::now().naive_local();
        let mut queue = EventQueue::new();
        queue.push(event(1, Some(MediaState::Completed), 3600));

        assert!(queue.pop_next(now).is_none());
        assert_eq!(queue.len(), 1);

        let later = now + Duration::seconds(3601);
        assert!(queue.pop_next(later).is_some());
    }

    #[test]
    fn drop_items_clears_matching_events() {
        let now = Local::now().naive_local();
        let mut queue = EventQueue::new();
        queue.push(event(1, None, -1));
        queue.push(event(2, None, -1));
        queue.push(event(3, None, -1));

        assert_eq!(queue.drop_items(&[1, 3]), 2);
        assert_eq!(queue.pop_next(now).unwrap().item_id, Some(2));
    }
}
