//! Domain models and data structures for wallet synchronization.
//!
//! This module contains all the core data structures used throughout the application:
//!
//! - `config`: Configuration loading and validation
//! - `core`: Core domain models (blocks, events, transactions, bus payloads)

mod config;
mod core;

// Re-export core types
pub use core::{
	contract_call_failed, filter_matches, AddressUpdate, BlockHeader, CoinTx, ConnectionStatus,
	DescriptorFactory, EventDescriptor, EvmLog, EvmReceipt, EvmTransaction, Meta, MetaParser,
	RawEvent, TransactionRecord, WalletErrorEvent, WalletStateChanged, CONTRACT_CALL_FAILED_KEY,
};

// Re-export config types
pub use config::{ConfigError, ConfigLoader, SyncConfig};
