//! Payloads published on the event bus.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::core::TransactionRecord;

/// Non-fatal failure surfaced to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletErrorEvent {
	/// Human readable summary
	pub message: String,
	/// Underlying error description
	pub inner: String,
	/// Component that raised the error
	pub plugin: String,
}

impl WalletErrorEvent {
	pub fn new(plugin: &str, message: impl Into<String>, inner: impl ToString) -> Self {
		Self {
			message: message.into(),
			inner: inner.to_string(),
			plugin: plugin.to_string(),
		}
	}
}

/// Indexer realtime connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
	pub connected: bool,
}

/// Generic "coin activity observed" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinTx {
	pub address: String,
}

/// Part of the wallet state that changed for an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressUpdate {
	Transactions(Vec<TransactionRecord>),
	Balance(U256),
}

/// Address scoped state update tagged with the open wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStateChanged {
	pub wallet_id: String,
	pub address: String,
	pub update: AddressUpdate,
}

impl WalletStateChanged {
	/// Renders the update as `{walletId: {addresses: {address: update}}}`
	pub fn to_json(&self) -> Value {
		let mut addresses = serde_json::Map::new();
		addresses.insert(
			self.address.clone(),
			serde_json::to_value(&self.update).unwrap_or(Value::Null),
		);
		let mut wallets = serde_json::Map::new();
		wallets.insert(self.wallet_id.clone(), json!({ "addresses": addresses }));
		Value::Object(wallets)
	}

	/// Number of transaction records carried by the update
	pub fn transaction_count(&self) -> usize {
		match &self.update {
			AddressUpdate::Transactions(records) => records.len(),
			AddressUpdate::Balance(_) => 0,
		}
	}
}
