//! EVM-compatible coin adapter implementation.
//!
//! Implements [`CoinAdapter`] on top of any [`JsonRpcTransport`]. Subscriptions
//! are built from node side filters (`eth_newBlockFilter`, `eth_newFilter`)
//! polled with `eth_getFilterChanges`, so plain HTTP endpoints are enough.

use std::{collections::VecDeque, str::FromStr, time::Duration};

use alloy::{
	json_abi::Event,
	primitives::{Address, B256, I256, U256},
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
	models::{filter_matches, BlockHeader, EvmLog, EvmReceipt, EvmTransaction, RawEvent},
	services::blockchain::{
		decode_log_values, hash_to_string, BlockChainError, CoinAdapter, EventQuery, EventStream,
		HeadStream, JsonRpcTransport,
	},
};

/// Coin adapter for Ethereum and other EVM-compatible chains
#[derive(Clone)]
pub struct EvmCoinAdapter<T: JsonRpcTransport> {
	transport: T,
	poll_interval: Duration,
}

impl<T: JsonRpcTransport> EvmCoinAdapter<T> {
	/// Creates an adapter over a transport
	///
	/// # Arguments
	/// * `transport` - JSON-RPC transport
	/// * `poll_interval` - Polling cadence of filter based subscriptions
	pub fn new(transport: T, poll_interval: Duration) -> Self {
		Self {
			transport,
			poll_interval,
		}
	}

	async fn get_optional<R>(&self, method: &str, hash: &str) -> Result<Option<R>, BlockChainError>
	where
		R: serde::de::DeserializeOwned,
	{
		let result = self
			.transport
			.send_raw_request(method, json!([hash]))
			.await?;

		if result.is_null() {
			return Ok(None);
		}

		serde_json::from_value(result).map(Some).map_err(|e| {
			BlockChainError::decode_error(format!("Failed to parse {} response: {}", method, e))
		})
	}

	fn log_filter(schema: &Event, contract_address: &str, query: &EventQuery) -> Value {
		let mut filter = Map::new();
		filter.insert("address".to_string(), json!(contract_address));
		if !schema.anonymous {
			let topics = filter_topics(schema, &query.filter);
			filter.insert("topics".to_string(), Value::Array(topics));
		}
		if let Some(from_block) = query.from_block {
			filter.insert("fromBlock".to_string(), json!(format!("0x{:x}", from_block)));
		}
		if let Some(to_block) = query.to_block {
			filter.insert("toBlock".to_string(), json!(format!("0x{:x}", to_block)));
		}
		Value::Object(filter)
	}
}

/// Topics selecting the event and the filtered indexed parameters
///
/// Positions without a filter are `null` wildcards, a list of values matches
/// any of them. Parameters whose filter can not be encoded as a topic are left
/// to the decoded value check.
fn filter_topics(schema: &Event, filter: &Map<String, Value>) -> Vec<Value> {
	let mut topics = vec![json!(hash_to_string(&schema.selector()))];
	for input in schema.inputs.iter().filter(|input| input.indexed) {
		let topic = filter
			.get(&input.name)
			.and_then(|expected| match expected {
				Value::Array(options) => options
					.iter()
					.map(|option| encode_topic(&input.ty, option))
					.collect::<Option<Vec<_>>>()
					.map(|words| json!(words.iter().map(hash_to_string).collect::<Vec<_>>())),
				single => encode_topic(&input.ty, single).map(|word| json!(hash_to_string(&word))),
			})
			.unwrap_or(Value::Null);
		topics.push(topic);
	}
	while topics.last().is_some_and(Value::is_null) {
		topics.pop();
	}
	topics
}

/// Encodes a filter value of a static ABI type as a topic word
fn encode_topic(ty: &str, value: &Value) -> Option<B256> {
	let text = match value {
		Value::String(text) => text.clone(),
		Value::Number(number) => number.to_string(),
		Value::Bool(flag) => flag.to_string(),
		_ => return None,
	};

	match ty {
		"address" => Address::from_str(&text).ok().map(|a| a.into_word()),
		"bool" => match text.as_str() {
			"true" => Some(B256::with_last_byte(1)),
			"false" => Some(B256::ZERO),
			_ => None,
		},
		ty if ty.starts_with("uint") => U256::from_str(&text)
			.ok()
			.map(|number| B256::from(number.to_be_bytes::<32>())),
		ty if ty.starts_with("int") => I256::from_str(&text)
			.ok()
			.map(|number| B256::from(number.into_raw().to_be_bytes::<32>())),
		ty if ty.starts_with("bytes") && ty.len() > "bytes".len() => {
			let bytes = hex::decode(text.trim_start_matches("0x")).ok()?;
			(bytes.len() <= 32).then(|| B256::right_padding_from(&bytes))
		}
		_ => None,
	}
}

/// Turns a log into a [`RawEvent`] when it decodes and satisfies the filter
///
/// Logs that can not be decoded are skipped.
fn log_to_event(
	schema: &Event,
	event_name: &str,
	filter: &Map<String, Value>,
	log: &EvmLog,
) -> Option<RawEvent> {
	if log.removed {
		return None;
	}

	let return_values = match decode_log_values(schema, log) {
		Ok(values) => values,
		Err(e) => {
			debug!(event = %event_name, contract = %log.address, "skipping log: {}", e);
			return None;
		}
	};
	if !filter_matches(&return_values, filter) {
		return None;
	}

	let Some(transaction_hash) = log.transaction_hash.as_ref().map(hash_to_string) else {
		debug!(event = %event_name, "skipping log without transaction hash");
		return None;
	};

	Some(RawEvent {
		address: log.address.to_checksum(None),
		event: event_name.to_string(),
		return_values,
		transaction_hash,
		block_number: log.block_number.map(|n| n.to::<u64>()),
		log_index: log.log_index.map(|n| n.to::<u64>()),
	})
}

/// Parses the header fields of an `eth_getBlockBy*` response
fn parse_block_header(block: &Value) -> Result<BlockHeader, BlockChainError> {
	let field = |name: &str| {
		block
			.get(name)
			.and_then(Value::as_str)
			.ok_or_else(|| BlockChainError::decode_error(format!("Block without {}", name)))
	};
	let quantity = |name: &str| {
		field(name).and_then(|raw| {
			u64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(|e| {
				BlockChainError::decode_error(format!("Invalid block {} {}: {}", name, raw, e))
			})
		})
	};

	Ok(BlockHeader {
		hash: field("hash")?.to_string(),
		number: quantity("number")?,
		timestamp: quantity("timestamp")?,
	})
}

/// Polls a node side filter and yields its changes one by one
struct FilterPoller<T: JsonRpcTransport> {
	transport: T,
	install: (&'static str, Value),
	filter_id: Option<String>,
	pending: VecDeque<Value>,
	poll_interval: Duration,
}

impl<T: JsonRpcTransport> FilterPoller<T> {
	fn new(transport: T, method: &'static str, params: Value, poll_interval: Duration) -> Self {
		Self {
			transport,
			install: (method, params),
			filter_id: None,
			pending: VecDeque::new(),
			poll_interval,
		}
	}

	async fn next_change(&mut self) -> Result<Value, BlockChainError> {
		loop {
			if let Some(change) = self.pending.pop_front() {
				return Ok(change);
			}

			let filter_id = match &self.filter_id {
				Some(id) => id.clone(),
				None => {
					let (method, params) = &self.install;
					let id = match self.transport.send_raw_request(method, params.clone()).await {
						Ok(id) => id,
						Err(e) => {
							tokio::time::sleep(self.poll_interval).await;
							return Err(e);
						}
					};
					let id = id.as_str().map(str::to_string).ok_or_else(|| {
						BlockChainError::decode_error(format!("{} returned no filter id", method))
					})?;
					debug!(filter_id = %id, method = %method, "installed filter");
					self.filter_id = Some(id.clone());
					id
				}
			};

			tokio::time::sleep(self.poll_interval).await;

			match self
				.transport
				.send_raw_request("eth_getFilterChanges", json!([filter_id]))
				.await
			{
				Ok(Value::Array(changes)) => self.pending.extend(changes),
				Ok(Value::Null) => {}
				Ok(other) => {
					return Err(BlockChainError::decode_error(format!(
						"Unexpected filter changes: {}",
						other
					)))
				}
				Err(e) => {
					// Nodes drop idle filters, install a fresh one on the next poll
					warn!(filter_id = %filter_id, "filter polling failed: {}", e);
					self.filter_id = None;
					return Err(e);
				}
			}
		}
	}
}

#[async_trait]
impl<T: JsonRpcTransport> CoinAdapter for EvmCoinAdapter<T> {
	async fn get_transaction(
		&self,
		hash: &str,
	) -> Result<Option<EvmTransaction>, BlockChainError> {
		self.get_optional("eth_getTransactionByHash", hash).await
	}

	async fn get_transaction_receipt(
		&self,
		hash: &str,
	) -> Result<Option<EvmReceipt>, BlockChainError> {
		self.get_optional("eth_getTransactionReceipt", hash).await
	}

	async fn get_balance(&self, address: &str) -> Result<U256, BlockChainError> {
		let address = self.get_hex_address(address)?;
		let result = self
			.transport
			.send_raw_request("eth_getBalance", json!([address, "latest"]))
			.await?;
		serde_json::from_value(result)
			.map_err(|e| BlockChainError::decode_error(format!("Invalid balance: {}", e)))
	}

	fn to_checksum_address(&self, address: &str) -> Result<String, BlockChainError> {
		Address::from_str(address)
			.map(|address| address.to_checksum(None))
			.map_err(|e| BlockChainError::decode_error(format!("Invalid address {}: {}", address, e)))
	}

	fn parse_return_values(
		&self,
		log: &EvmLog,
		schema: &Event,
	) -> Result<Map<String, Value>, BlockChainError> {
		decode_log_values(schema, log)
	}

	fn get_hex_address(&self, address: &str) -> Result<String, BlockChainError> {
		Address::from_str(address)
			.map(|address| format!("0x{}", hex::encode(address.as_slice())))
			.map_err(|e| BlockChainError::decode_error(format!("Invalid address {}: {}", address, e)))
	}

	fn subscribe_to_events(
		&self,
		schema: &Event,
		contract_address: &str,
		event_name: &str,
		query: EventQuery,
	) -> EventStream {
		let params = json!([Self::log_filter(schema, contract_address, &query)]);
		let poller = FilterPoller::new(
			self.transport.clone(),
			"eth_newFilter",
			params,
			self.poll_interval,
		);
		let schema = schema.clone();
		let event_name = event_name.to_string();

		stream::unfold(poller, |mut poller| async move {
			let change = poller.next_change().await;
			Some((change, poller))
		})
		.filter_map(move |change| {
			let item = match change {
				Ok(raw) => match serde_json::from_value::<EvmLog>(raw) {
					Ok(log) => log_to_event(&schema, &event_name, &query.filter, &log).map(Ok),
					Err(e) => {
						debug!(event = %event_name, "skipping malformed log: {}", e);
						None
					}
				},
				Err(e) => Some(Err(e)),
			};
			futures::future::ready(item)
		})
		.boxed()
	}

	async fn get_past_events(
		&self,
		schema: &Event,
		contract_address: &str,
		event_name: &str,
		query: EventQuery,
	) -> Result<Vec<RawEvent>, BlockChainError> {
		let filter = Self::log_filter(schema, contract_address, &query);
		let result = self
			.transport
			.send_raw_request("eth_getLogs", json!([filter]))
			.await?;
		let logs: Vec<EvmLog> = serde_json::from_value(result)
			.map_err(|e| BlockChainError::decode_error(format!("Failed to parse logs: {}", e)))?;

		Ok(logs
			.iter()
			.filter_map(|log| log_to_event(schema, event_name, &query.filter, log))
			.collect())
	}

	async fn get_latest_block(&self) -> Result<BlockHeader, BlockChainError> {
		let block = self
			.transport
			.send_raw_request("eth_getBlockByNumber", json!(["latest", false]))
			.await?;
		if block.is_null() {
			return Err(BlockChainError::request_error("Latest block not available"));
		}
		parse_block_header(&block)
	}

	fn subscribe_new_heads(&self) -> HeadStream {
		let poller = FilterPoller::new(
			self.transport.clone(),
			"eth_newBlockFilter",
			json!([]),
			self.poll_interval,
		);
		let transport = self.transport.clone();

		stream::unfold(poller, |mut poller| async move {
			let change = poller.next_change().await;
			Some((change, poller))
		})
		.then(move |change| {
			let transport = transport.clone();
			async move {
				let hash = change?;
				let block = transport
					.send_raw_request("eth_getBlockByHash", json!([hash, false]))
					.await?;
				parse_block_header(&block)
			}
		})
		.boxed()
	}
}
