//! Core services of the synchronization engine.
//!
//! - `blockchain`: coin adapter capability set and the EVM JSON-RPC adapter
//! - `blockwatcher`: chain-head tracker
//! - `bus`: typed publish/subscribe bus
//! - `indexer`: indexer REST client and realtime transaction feed
//! - `queue`: consolidation queue
//! - `registry`: event registry
//! - `resync`: resync state machine
//! - `scanner`: chunked historical scanner
//! - `sync`: orchestrator

pub mod blockchain;
pub mod blockwatcher;
pub mod bus;
pub mod indexer;
pub mod queue;
pub mod registry;
pub mod resync;
pub mod scanner;
pub mod sync;
