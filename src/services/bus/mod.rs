//! Process wide publish/subscribe bus.
//!
//! Every event kind has its own typed channel so subscribers get the payload
//! shape checked at compile time:
//!
//! - `coin-block`: [`BlockHeader`]
//! - `coin-tx`: [`CoinTx`]
//! - `wallet-state-changed`: [`WalletStateChanged`]
//! - `wallet-error`: [`WalletErrorEvent`]
//! - `indexer-connection-status-changed`: [`ConnectionStatus`]
//!
//! The bus also owns the wallet context set by the "open wallet" signal.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{trace, warn};

use crate::models::{
	AddressUpdate, BlockHeader, CoinTx, ConnectionStatus, WalletErrorEvent, WalletStateChanged,
};

const CHANNEL_CAPACITY: usize = 1024;

/// Errors raised when publishing on the bus
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
	#[error("Wallet ID not set")]
	NoWalletContext,
}

/// Cloneable handle to the event bus
#[derive(Clone)]
pub struct EventBus {
	inner: Arc<BusInner>,
}

struct BusInner {
	coin_block: broadcast::Sender<BlockHeader>,
	coin_tx: broadcast::Sender<CoinTx>,
	wallet_state: broadcast::Sender<WalletStateChanged>,
	wallet_error: broadcast::Sender<WalletErrorEvent>,
	connection_status: broadcast::Sender<ConnectionStatus>,
	wallet: watch::Sender<Option<String>>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	pub fn new() -> Self {
		let (wallet, _) = watch::channel(None);
		Self {
			inner: Arc::new(BusInner {
				coin_block: broadcast::channel(CHANNEL_CAPACITY).0,
				coin_tx: broadcast::channel(CHANNEL_CAPACITY).0,
				wallet_state: broadcast::channel(CHANNEL_CAPACITY).0,
				wallet_error: broadcast::channel(CHANNEL_CAPACITY).0,
				connection_status: broadcast::channel(CHANNEL_CAPACITY).0,
				wallet,
			}),
		}
	}

	/// Sets the wallet every subsequent state update is tagged with
	pub fn open_wallet(&self, wallet_id: impl Into<String>) {
		let wallet_id = wallet_id.into();
		trace!(wallet_id = %wallet_id, "wallet opened");
		self.inner.wallet.send_replace(Some(wallet_id));
	}

	/// Currently open wallet, if any
	pub fn active_wallet(&self) -> Option<String> {
		self.inner.wallet.borrow().clone()
	}

	pub fn publish_block(&self, header: BlockHeader) {
		let number = header.number;
		if self.inner.coin_block.send(header).is_err() {
			trace!(block = number, "no coin-block subscribers");
		}
	}

	pub fn publish_coin_tx(&self, address: &str) {
		let event = CoinTx {
			address: address.to_string(),
		};
		if self.inner.coin_tx.send(event).is_err() {
			trace!(address = %address, "no coin-tx subscribers");
		}
	}

	/// Publishes an address scoped state update for the open wallet
	///
	/// Fails without publishing when no wallet has been opened yet.
	pub fn publish_wallet_state(
		&self,
		address: &str,
		update: AddressUpdate,
	) -> Result<(), BusError> {
		let wallet_id = self.active_wallet().ok_or(BusError::NoWalletContext)?;
		let event = WalletStateChanged {
			wallet_id,
			address: address.to_string(),
			update,
		};
		if self.inner.wallet_state.send(event).is_err() {
			trace!(address = %address, "no wallet-state-changed subscribers");
		}
		Ok(())
	}

	/// Publishes a non-fatal error for the host application
	pub fn publish_wallet_error(&self, plugin: &str, message: &str, inner: impl ToString) {
		let event = WalletErrorEvent::new(plugin, message, inner);
		warn!(plugin = %event.plugin, inner = %event.inner, "{}", event.message);
		let _ = self.inner.wallet_error.send(event);
	}

	pub fn publish_connection_status(&self, connected: bool) {
		let _ = self
			.inner
			.connection_status
			.send(ConnectionStatus { connected });
	}

	pub fn subscribe_blocks(&self) -> broadcast::Receiver<BlockHeader> {
		self.inner.coin_block.subscribe()
	}

	pub fn subscribe_coin_tx(&self) -> broadcast::Receiver<CoinTx> {
		self.inner.coin_tx.subscribe()
	}

	pub fn subscribe_wallet_state(&self) -> broadcast::Receiver<WalletStateChanged> {
		self.inner.wallet_state.subscribe()
	}

	pub fn subscribe_wallet_errors(&self) -> broadcast::Receiver<WalletErrorEvent> {
		self.inner.wallet_error.subscribe()
	}

	pub fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatus> {
		self.inner.connection_status.subscribe()
	}
}
