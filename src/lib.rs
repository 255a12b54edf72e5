//! Wallet transaction and event synchronization engine.
//!
//! Keeps a wallet's view of its transactions and contract events consistent
//! with a chain node and a transaction indexer, across socket drops,
//! reconnects, duplicate notifications and provider range limits.
//!
//! # Architecture
//! - Event registry: contract events to watch, per address
//! - Chain-head tracker: current block, with polling fallback
//! - Realtime feed: indexer websocket, signals resyncs on disconnect
//! - Historical scanner: bounded windowed range scans
//! - Resync cursors: single-flight catch-up scans driven by block ticks
//! - Consolidation queue: debounced per-address merge and emission
//! - Orchestrator: the public synchronization operations

pub mod bootstrap;
pub mod models;
pub mod services;
pub mod utils;
