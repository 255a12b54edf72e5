//! Transaction indexer integration.
//!
//! - `IndexerClient`: REST client (session bootstrap, historical transactions)
//!   and realtime transaction feed over a websocket
//! - `IndexerApi`: the capability set consumed by the rest of the engine
//! - `FeedEvent`: items of the realtime feed

mod client;
mod error;
mod feed;

pub use client::{IndexerApi, IndexerClient, IndexerConfig, INDEXER_PLUGIN};
pub use error::IndexerError;
pub use feed::{parse_feed_message, FeedEvent, FeedStream};
