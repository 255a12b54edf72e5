//! Chain-head tracking.
//!
//! - `ChainHeadTracker`: follows new heads and falls back to polling on silence
//! - `BlockWatcherError`: tracker error type

mod error;
mod tracker;

pub use error::BlockWatcherError;
pub use tracker::{ChainHeadTracker, HEAD_TRACKER_PLUGIN};
