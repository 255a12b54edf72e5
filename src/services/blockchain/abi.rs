//! ABI log decoding helpers.

use alloy::{
	dyn_abi::{DynSolValue, EventExt},
	json_abi::Event,
	primitives::B256,
};
use serde_json::{Map, Value};

use crate::{models::EvmLog, services::blockchain::BlockChainError};

/// Decodes a log into its parameters keyed by name
///
/// Unnamed parameters are keyed by their position. Numbers are rendered as
/// decimal strings and addresses with their checksum.
pub fn decode_log_values(event: &Event, log: &EvmLog) -> Result<Map<String, Value>, BlockChainError> {
	let decoded = event
		.decode_log_parts(log.topics.iter().copied(), &log.data)
		.map_err(|e| {
			BlockChainError::decode_error(format!("Failed to decode {} log: {}", event.name, e))
		})?;

	let mut indexed = decoded.indexed.into_iter();
	let mut body = decoded.body.into_iter();
	let mut values = Map::new();

	for (position, input) in event.inputs.iter().enumerate() {
		let value = if input.indexed {
			indexed.next()
		} else {
			body.next()
		};
		let value = value.ok_or_else(|| {
			BlockChainError::decode_error(format!(
				"Missing value for parameter {} of {}",
				position, event.name
			))
		})?;
		let key = if input.name.is_empty() {
			position.to_string()
		} else {
			input.name.clone()
		};
		values.insert(key, dyn_sol_to_json(&value));
	}

	Ok(values)
}

/// Renders a decoded ABI value as JSON
pub fn dyn_sol_to_json(value: &DynSolValue) -> Value {
	match value {
		DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
		DynSolValue::Bool(flag) => Value::Bool(*flag),
		DynSolValue::Uint(number, _) => Value::String(number.to_string()),
		DynSolValue::Int(number, _) => Value::String(number.to_string()),
		DynSolValue::FixedBytes(word, size) => {
			Value::String(format!("0x{}", hex::encode(&word[..*size])))
		}
		DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
		DynSolValue::String(text) => Value::String(text.clone()),
		DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
			Value::Array(items.iter().map(dyn_sol_to_json).collect())
		}
		other => Value::String(format!("{:?}", other)),
	}
}

/// Formats a 32 byte hash as 0x-prefixed lowercase hex
pub fn hash_to_string(hash: &B256) -> String {
	format!("0x{}", hex::encode(hash.as_slice()))
}
