//! Element fusion: turns raw captures into stably-identified snapshots.

mod click;
mod element;
mod engine;
mod ids;
mod snapshot;

pub use click::safe_click_point;
pub use element::{Bounds, ElementKind, ElementRecord, Interactivity, Provenance, UiElement};
pub use engine::{FusionConfig, FusionEngine};
pub use ids::{slugify, IdAllocator, DEFAULT_SLUG_MAX_LEN};
pub use snapshot::{layout_fingerprint, FusedStateSnapshot, SnapshotDiff};
