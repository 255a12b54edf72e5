//! Contract event registrations and decoded events.

use std::{fmt, sync::Arc};

use alloy::json_abi::{Event, JsonAbi};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::core::Meta;

/// Turns a decoded event into the annotation merged into its transaction record
pub type MetaParser = Arc<dyn Fn(&RawEvent) -> Meta + Send + Sync>;

/// Materializes an [`EventDescriptor`] for a watched address
///
/// Factories are address-parameterized so a single registration serves every
/// address the wallet syncs.
pub type DescriptorFactory = Arc<dyn Fn(&str) -> EventDescriptor + Send + Sync>;

/// A decoded contract event as pushed into the consolidation queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
	/// Address of the contract that emitted the event
	pub address: String,

	/// Event name as declared in the ABI
	pub event: String,

	/// Decoded event parameters keyed by parameter name
	pub return_values: Map<String, Value>,

	/// Hash of the transaction that emitted the event
	pub transaction_hash: String,

	#[serde(default)]
	pub block_number: Option<u64>,

	#[serde(default)]
	pub log_index: Option<u64>,
}

/// Describes one contract event to watch for an address
#[derive(Clone)]
pub struct EventDescriptor {
	/// Address of the contract emitting the event
	pub contract_address: String,

	/// ABI of the contract
	pub abi: Arc<JsonAbi>,

	/// Name of the event inside the ABI
	pub event_name: String,

	/// Field to value predicate the decoded parameters must satisfy
	pub filter: Map<String, Value>,

	/// Builds the transaction annotation from a matching event
	pub meta_parser: MetaParser,

	/// Scans never query below this block (usually the deployment block)
	pub min_block: u64,
}

impl EventDescriptor {
	/// Returns the ABI entry of the watched event, if the contract declares it
	pub fn event_schema(&self) -> Option<&Event> {
		self.abi
			.events
			.get(&self.event_name)
			.and_then(|overloads| overloads.first())
	}

	/// Checks decoded parameters against the descriptor filter
	///
	/// Every filter key must be present and equal. Objects are matched
	/// partially and hex strings compare case-insensitively.
	pub fn matches(&self, return_values: &Map<String, Value>) -> bool {
		filter_matches(return_values, &self.filter)
	}

	/// Clamps a block range to the descriptor floor
	pub fn clamp_range(&self, from_block: u64, to_block: u64) -> (u64, u64) {
		(from_block.max(self.min_block), to_block.max(self.min_block))
	}
}

impl fmt::Debug for EventDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventDescriptor")
			.field("contract_address", &self.contract_address)
			.field("event_name", &self.event_name)
			.field("filter", &self.filter)
			.field("min_block", &self.min_block)
			.finish_non_exhaustive()
	}
}

/// Partial deep match of decoded parameters against a filter
pub fn filter_matches(values: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
	filter.iter().all(|(key, expected)| {
		values
			.get(key)
			.is_some_and(|actual| value_matches(actual, expected))
	})
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
	match (actual, expected) {
		(Value::Object(actual), Value::Object(expected)) => filter_matches(actual, expected),
		// A list of candidates matches any of them
		(actual, Value::Array(options)) if !actual.is_array() => {
			options.iter().any(|option| value_matches(actual, option))
		}
		(Value::String(actual), Value::String(expected))
			if actual.starts_with("0x") && expected.starts_with("0x") =>
		{
			actual.eq_ignore_ascii_case(expected)
		}
		_ => actual == expected,
	}
}
