//! Upstream version tracking.
//!
//! `versions.json` pins one tag per package. The tracker lists each
//! upstream's tags, keeps the stable ones, and reports or rewrites pins that
//! have fallen behind.

pub mod registry;
pub mod tags;
pub mod tracker;
pub mod upstream;

pub use registry::VersionRegistry;
pub use tags::{StabilityPolicy, TagVersion};
pub use tracker::{CheckMode, PendingUpdate, TrackerOutcome, VersionTracker};
pub use upstream::{HttpTagSource, TagSource};
