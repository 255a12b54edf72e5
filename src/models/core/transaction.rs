//! Chain transaction bodies, receipts and consolidated transaction records.
//!
//! The body and receipt types mirror the JSON-RPC shapes returned by EVM nodes.
//! Unknown fields are ignored so the same types accept responses from any
//! compatible client.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Free-form annotation accumulated for a transaction hash
pub type Meta = Map<String, Value>;

/// Meta key mirroring [`TransactionRecord::contract_call_failed`]
pub const CONTRACT_CALL_FAILED_KEY: &str = "contractCallFailed";

/// Transaction body as returned by `eth_getTransactionByHash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
	pub hash: B256,
	pub from: Address,
	#[serde(default)]
	pub to: Option<Address>,
	#[serde(default)]
	pub input: Bytes,
	/// Gas limit supplied by the sender
	pub gas: U256,
	#[serde(default)]
	pub value: U256,
	#[serde(default)]
	pub block_number: Option<U64>,
	#[serde(default)]
	pub block_hash: Option<B256>,
}

/// Transaction receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
	pub transaction_hash: B256,
	pub from: Address,
	#[serde(default)]
	pub to: Option<Address>,
	pub gas_used: U256,
	/// Execution status, absent on chains predating the status field
	#[serde(default, deserialize_with = "deserialize_status")]
	pub status: Option<bool>,
	#[serde(default)]
	pub logs: Vec<EvmLog>,
	#[serde(default)]
	pub block_number: Option<U64>,
	#[serde(default)]
	pub contract_address: Option<Address>,
}

/// Log entry of a receipt or of an `eth_getLogs` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
	pub address: Address,
	#[serde(default)]
	pub topics: Vec<B256>,
	#[serde(default)]
	pub data: Bytes,
	#[serde(default)]
	pub block_number: Option<U64>,
	#[serde(default)]
	pub transaction_hash: Option<B256>,
	#[serde(default)]
	pub log_index: Option<U64>,
	#[serde(default)]
	pub removed: bool,
}

/// Consolidated state of one transaction for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub transaction: EvmTransaction,
	pub receipt: Option<EvmReceipt>,
	pub meta: Meta,
	/// Derived from the receipt, `false` while no receipt is available
	pub contract_call_failed: bool,
}

impl TransactionRecord {
	/// Builds a record, deriving the failure flag from the receipt when present
	///
	/// With a receipt the flag is also recorded in `meta` under
	/// [`CONTRACT_CALL_FAILED_KEY`].
	pub fn new(transaction: EvmTransaction, receipt: Option<EvmReceipt>, mut meta: Meta) -> Self {
		let contract_call_failed = match &receipt {
			Some(receipt) => {
				let failed = contract_call_failed(&transaction, receipt);
				meta.insert(CONTRACT_CALL_FAILED_KEY.to_string(), Value::Bool(failed));
				failed
			}
			None => false,
		};
		Self {
			transaction,
			receipt,
			meta,
			contract_call_failed,
		}
	}
}

/// Decides whether a mined transaction failed
///
/// An explicit receipt status always wins. Without one, the call is considered
/// failed when it carried input data, used its entire gas limit and emitted no
/// logs. The fallback is approximate and kept for chains without the status
/// field.
pub fn contract_call_failed(transaction: &EvmTransaction, receipt: &EvmReceipt) -> bool {
	match receipt.status {
		Some(status) => !status,
		None => {
			!transaction.input.is_empty()
				&& transaction.gas == receipt.gas_used
				&& receipt.logs.is_empty()
		}
	}
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => Ok(None),
		Some(Value::Bool(status)) => Ok(Some(status)),
		Some(Value::Number(number)) => Ok(Some(number.as_u64() == Some(1))),
		Some(Value::String(raw)) => {
			let digits = raw.trim_start_matches("0x");
			u64::from_str_radix(digits, 16)
				.map(|status| Some(status == 1))
				.map_err(|e| D::Error::custom(format!("invalid receipt status {}: {}", raw, e)))
		}
		Some(other) => Err(D::Error::custom(format!(
			"invalid receipt status {}",
			other
		))),
	}
}
