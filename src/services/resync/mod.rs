//! Resync state machine.
//!
//! A [`SyncCursor`] tracks, for one address and one subscription, the last
//! block known to be fully synchronized. Stream errors and reconnects flag the
//! cursor; the next block tick turns the flag into a single catch-up scan
//! from the cursor to the tick's block.
//!
//! ```text
//! Synced --request_resync--> PendingResync --tick--> Resyncing --ok--> Synced
//!                                 ^                      |
//!                                 +--------failure-------+
//! ```

use std::{fmt::Display, future::Future, sync::Mutex};

use tracing::{debug, info, warn};

use crate::utils::metrics::RESYNC_SCANS;

/// Observable phase of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
	Synced,
	PendingResync,
	Resyncing,
}

/// What a block tick did to a cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	/// No resync pending, the cursor moved to the tick's block
	Advanced(u64),
	/// A resync was already in flight, the tick was ignored
	Skipped,
	/// A catch-up scan covered the range
	Resynced { from_block: u64, to_block: u64 },
	/// The catch-up scan failed, the next tick retries from the same block
	Failed {
		from_block: u64,
		to_block: u64,
		error: String,
	},
}

#[derive(Debug, Default)]
struct CursorState {
	best_synced_block: u64,
	resync_requested: bool,
	resync_in_flight: bool,
}

/// Per address, per subscription bookkeeping
#[derive(Debug)]
pub struct SyncCursor {
	name: String,
	state: Mutex<CursorState>,
}

impl SyncCursor {
	/// Creates a synced cursor
	///
	/// # Arguments
	/// * `name` - Label used in logs, e.g. `eth-txs` or an event name
	/// * `best_synced_block` - Last block already covered
	pub fn new(name: impl Into<String>, best_synced_block: u64) -> Self {
		Self {
			name: name.into(),
			state: Mutex::new(CursorState {
				best_synced_block,
				..Default::default()
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, CursorState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Flags the cursor for a catch-up scan on the next tick
	///
	/// Safe to call from any task, repeated calls collapse into one scan.
	pub fn request_resync(&self) {
		let mut state = self.lock();
		if !state.resync_requested {
			debug!(cursor = %self.name, from_block = state.best_synced_block, "resync requested");
		}
		state.resync_requested = true;
	}

	pub fn phase(&self) -> CursorPhase {
		let state = self.lock();
		if state.resync_in_flight {
			CursorPhase::Resyncing
		} else if state.resync_requested {
			CursorPhase::PendingResync
		} else {
			CursorPhase::Synced
		}
	}

	pub fn best_synced_block(&self) -> u64 {
		self.lock().best_synced_block
	}

	/// Records progress made outside block ticks, e.g. by a backfill
	pub fn advance_to(&self, block_number: u64) {
		let mut state = self.lock();
		state.best_synced_block = state.best_synced_block.max(block_number);
	}

	/// Applies a block tick
	///
	/// When a resync is pending and none is in flight, `scan` is called with
	/// the range from the cursor to the tick's block. A lower block number
	/// never moves the cursor backwards.
	pub async fn on_block<F, Fut, E>(&self, block_number: u64, scan: F) -> TickOutcome
	where
		F: FnOnce(u64, u64) -> Fut,
		Fut: Future<Output = Result<(), E>>,
		E: Display,
	{
		let (from_block, to_block) = {
			let mut state = self.lock();
			if state.resync_in_flight {
				return TickOutcome::Skipped;
			}
			if !state.resync_requested {
				state.best_synced_block = state.best_synced_block.max(block_number);
				return TickOutcome::Advanced(state.best_synced_block);
			}
			state.resync_requested = false;
			state.resync_in_flight = true;
			let from_block = state.best_synced_block;
			(from_block, block_number.max(from_block))
		};

		info!(cursor = %self.name, from_block, to_block, "resyncing");
		let mut in_flight = InFlight {
			cursor: self,
			completed: false,
		};

		match scan(from_block, to_block).await {
			Ok(()) => {
				in_flight.completed = true;
				let mut state = self.lock();
				state.best_synced_block = state.best_synced_block.max(to_block);
				RESYNC_SCANS.with_label_values(&["success"]).inc();
				TickOutcome::Resynced {
					from_block,
					to_block,
				}
			}
			Err(e) => {
				warn!(cursor = %self.name, from_block, to_block, "resync failed: {}", e);
				RESYNC_SCANS.with_label_values(&["failure"]).inc();
				TickOutcome::Failed {
					from_block,
					to_block,
					error: e.to_string(),
				}
			}
		}
	}
}

/// Clears the in-flight flag when a scan ends, re-requesting unless it succeeded
///
/// Also runs when the tick future is dropped mid-scan.
struct InFlight<'a> {
	cursor: &'a SyncCursor,
	completed: bool,
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		let mut state = self.cursor.lock();
		state.resync_in_flight = false;
		if !self.completed {
			state.resync_requested = true;
		}
	}
}
