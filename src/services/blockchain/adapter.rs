//! Capability set the synchronization engine needs from a chain.

use alloy::{json_abi::Event, primitives::U256};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::{
	models::{BlockHeader, EvmLog, EvmReceipt, EvmTransaction, RawEvent},
	services::blockchain::BlockChainError,
};

/// Stream of decoded contract events
pub type EventStream = BoxStream<'static, Result<RawEvent, BlockChainError>>;

/// Stream of new chain heads
pub type HeadStream = BoxStream<'static, Result<BlockHeader, BlockChainError>>;

/// Block range and parameter filter of an event query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
	pub from_block: Option<u64>,
	pub to_block: Option<u64>,
	/// Decoded parameters every returned event must match
	pub filter: Map<String, Value>,
}

impl EventQuery {
	pub fn range(from_block: u64, to_block: u64, filter: Map<String, Value>) -> Self {
		Self {
			from_block: Some(from_block),
			to_block: Some(to_block),
			filter,
		}
	}
}

/// Chain specific operations consumed by the synchronization engine
#[async_trait]
pub trait CoinAdapter: Send + Sync {
	/// Fetches a transaction body, `None` while the node does not know it
	async fn get_transaction(&self, hash: &str)
		-> Result<Option<EvmTransaction>, BlockChainError>;

	/// Fetches a transaction receipt, `None` until the transaction is mined
	async fn get_transaction_receipt(
		&self,
		hash: &str,
	) -> Result<Option<EvmReceipt>, BlockChainError>;

	async fn get_balance(&self, address: &str) -> Result<U256, BlockChainError>;

	/// Formats an address with its EIP-55 checksum
	fn to_checksum_address(&self, address: &str) -> Result<String, BlockChainError>;

	/// Decodes the parameters of a log according to the event schema
	fn parse_return_values(
		&self,
		log: &EvmLog,
		schema: &Event,
	) -> Result<Map<String, Value>, BlockChainError>;

	/// Formats an address as lowercase 0x-prefixed hex
	fn get_hex_address(&self, address: &str) -> Result<String, BlockChainError>;

	/// Streams new events emitted by a contract
	///
	/// Transport failures are yielded as `Err` items and the stream keeps
	/// going, so consumers can flag a resync without resubscribing.
	fn subscribe_to_events(
		&self,
		schema: &Event,
		contract_address: &str,
		event_name: &str,
		query: EventQuery,
	) -> EventStream;

	/// Returns events emitted by a contract within a block range
	async fn get_past_events(
		&self,
		schema: &Event,
		contract_address: &str,
		event_name: &str,
		query: EventQuery,
	) -> Result<Vec<RawEvent>, BlockChainError>;

	async fn get_latest_block(&self) -> Result<BlockHeader, BlockChainError>;

	/// Streams new chain heads as the node reports them
	fn subscribe_new_heads(&self) -> HeadStream;
}
