//! Progress projection
//!
//! [`ProgressTracker`] holds the counters a UI needs and nothing else; the
//! controller mutates it on every transition and pushes the resulting
//! [`ProgressSnapshot`] through [`ProgressSubscribers`].

/// Observer registry
pub mod subscribers;
/// Counters and snapshots
pub mod tracker;

pub use subscribers::{ProgressCallback, ProgressSubscribers, Subscription};
pub use tracker::{ProgressSnapshot, ProgressTracker};
