//! Core domain models for wallet synchronization.
//!
//! This module contains the fundamental data structures that flow between the
//! synchronization components:
//!
//! - Block: chain head snapshots
//! - Event: contract event registrations and decoded events
//! - Transaction: chain transaction bodies, receipts and consolidated records
//! - Wallet: payloads published on the event bus

mod block;
mod event;
mod transaction;
mod wallet;

pub use block::BlockHeader;
pub use event::{filter_matches, DescriptorFactory, EventDescriptor, MetaParser, RawEvent};
pub use transaction::{
	contract_call_failed, EvmLog, EvmReceipt, EvmTransaction, Meta, TransactionRecord,
	CONTRACT_CALL_FAILED_KEY,
};
pub use wallet::{AddressUpdate, CoinTx, ConnectionStatus, WalletErrorEvent, WalletStateChanged};
