//! Domain types for media items and their lifecycle states

pub mod item;
pub mod state;
pub mod stream;

pub use item::{
    ActiveStream, Aliases, AirsDays, ChildView, ContentItem, ItemKind, ItemSnapshot, QueueView,
    ReleaseData, derive_parent_state,
};
pub use state::MediaState;
pub use stream::{Stream, normalize_infohash};
