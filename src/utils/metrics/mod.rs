//! Metrics module for the application.
//!
//! - This module contains the global Prometheus registry.
//! - Defines the synchronization metrics updated by the services.

pub mod server;
use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
	// Global Prometheus registry.
	pub static ref REGISTRY: Registry = Registry::new();

	// Counter of notifications pushed into the consolidation queue, by kind.
	pub static ref NOTIFICATIONS_ENQUEUED: IntCounterVec = {
		let counter = IntCounterVec::new(
			Opts::new("queue_notifications_total", "Notifications pushed into the consolidation queue"),
			&["kind"]
		).unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of debounced flushes.
	pub static ref QUEUE_FLUSHES: IntCounter = {
		let counter = IntCounter::new("queue_flushes_total", "Debounced per-address flushes").unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of wallet-state-changed emissions produced by the queue.
	pub static ref QUEUE_EMISSIONS: IntCounter = {
		let counter = IntCounter::new("queue_emissions_total", "Per-address state updates emitted").unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of caller completions rejected by a failed flush.
	pub static ref COMPLETIONS_REJECTED: IntCounter = {
		let counter = IntCounter::new("queue_completions_rejected_total", "Caller completions rejected").unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of resync scans, by outcome.
	pub static ref RESYNC_SCANS: IntCounterVec = {
		let counter = IntCounterVec::new(
			Opts::new("resync_scans_total", "Catch-up scans started by block ticks"),
			&["outcome"]
		).unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of historical scan windows fetched.
	pub static ref SCAN_WINDOWS: IntCounter = {
		let counter = IntCounter::new("scan_windows_total", "Event windows fetched by the historical scanner").unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Counter of indexer socket reconnections.
	pub static ref INDEXER_RECONNECTS: IntCounter = {
		let counter = IntCounter::new("indexer_reconnects_total", "Indexer socket reconnections").unwrap();
		REGISTRY.register(Box::new(counter.clone())).unwrap();
		counter
	};

	// Gauge for the latest observed chain head.
	pub static ref LATEST_BLOCK: Gauge = {
		let gauge = Gauge::new("latest_block_number", "Latest chain head observed").unwrap();
		REGISTRY.register(Box::new(gauge.clone())).unwrap();
		gauge
	};
}

/// Gather all metrics and encode into the provided format.
pub fn gather_metrics() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
	let encoder = TextEncoder::new();
	let metric_families = REGISTRY.gather();
	let mut buffer = Vec::new();
	encoder.encode(&metric_families, &mut buffer)?;
	Ok(buffer)
}
