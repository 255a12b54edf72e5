//! Mock implementations of the chain adapter and the indexer.
//!
//! - [`MockCoinAdapter`] - Mock implementation of the coin adapter
//! - [`MockIndexerApi`] - Mock implementation of the indexer client
//!
//! The helpers below install the address and decoding expectations most tests
//! share, delegating to the real implementations.

use std::str::FromStr;

use alloy::{
	json_abi::Event,
	primitives::{Address, U256},
};
use async_trait::async_trait;
use futures::stream;
use mockall::mock;
use serde_json::{Map, Value};

use wallet_tx_sync::{
	models::{BlockHeader, EvmLog, EvmReceipt, EvmTransaction, RawEvent},
	services::{
		blockchain::{
			decode_log_values, BlockChainError, CoinAdapter, EventQuery, EventStream, HeadStream,
		},
		indexer::{FeedStream, IndexerApi, IndexerError},
	},
	utils::tests::{ReceiptBuilder, TransactionBuilder},
};

mock! {
	/// Mock implementation of the coin adapter.
	///
	/// Simulates node responses without network calls.
	pub CoinAdapter {}

	#[async_trait]
	impl CoinAdapter for CoinAdapter {
		async fn get_transaction(&self, hash: &str)
			-> Result<Option<EvmTransaction>, BlockChainError>;
		async fn get_transaction_receipt(
			&self,
			hash: &str,
		) -> Result<Option<EvmReceipt>, BlockChainError>;
		async fn get_balance(&self, address: &str) -> Result<U256, BlockChainError>;
		fn to_checksum_address(&self, address: &str) -> Result<String, BlockChainError>;
		fn parse_return_values(
			&self,
			log: &EvmLog,
			schema: &Event,
		) -> Result<Map<String, Value>, BlockChainError>;
		fn get_hex_address(&self, address: &str) -> Result<String, BlockChainError>;
		fn subscribe_to_events(
			&self,
			schema: &Event,
			contract_address: &str,
			event_name: &str,
			query: EventQuery,
		) -> EventStream;
		async fn get_past_events(
			&self,
			schema: &Event,
			contract_address: &str,
			event_name: &str,
			query: EventQuery,
		) -> Result<Vec<RawEvent>, BlockChainError>;
		async fn get_latest_block(&self) -> Result<BlockHeader, BlockChainError>;
		fn subscribe_new_heads(&self) -> HeadStream;
	}
}

mock! {
	/// Mock implementation of the indexer client.
	pub IndexerApi {}

	#[async_trait]
	impl IndexerApi for IndexerApi {
		async fn get_transactions(
			&self,
			from_block: u64,
			to_block: u64,
			address: &str,
		) -> Result<Vec<String>, IndexerError>;
		fn get_transaction_stream(&self, address: &str) -> FeedStream;
	}
}

pub fn header(number: u64) -> BlockHeader {
	BlockHeader {
		hash: format!("0x{:064x}", number),
		number,
		timestamp: 1_700_000_000 + number,
	}
}

/// Address formatting and log decoding backed by the real implementations
pub fn with_address_helpers(adapter: &mut MockCoinAdapter) {
	adapter.expect_to_checksum_address().returning(|address| {
		Address::from_str(address)
			.map(|address| address.to_checksum(None))
			.map_err(|e| BlockChainError::decode_error(e.to_string()))
	});
	adapter
		.expect_get_hex_address()
		.returning(|address| Ok(address.to_lowercase()));
	adapter
		.expect_parse_return_values()
		.returning(|log, schema| decode_log_values(schema, log));
}

/// Every hash resolves to a mined transaction
pub fn with_known_transactions(adapter: &mut MockCoinAdapter) {
	adapter
		.expect_get_transaction()
		.returning(|hash| Ok(Some(TransactionBuilder::new().hash(hash).build())));
	adapter
		.expect_get_transaction_receipt()
		.returning(|hash| Ok(Some(ReceiptBuilder::new().transaction_hash(hash).build())));
}

/// Subscriptions that never yield
pub fn with_silent_subscriptions(adapter: &mut MockCoinAdapter) {
	adapter
		.expect_subscribe_new_heads()
		.returning(|| Box::pin(stream::pending()));
	adapter
		.expect_subscribe_to_events()
		.returning(|_, _, _, _| Box::pin(stream::pending()));
}
