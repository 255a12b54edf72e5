//! Wallet transaction synchronization service entry point.
//!
//! This binary synchronizes the transaction history of one address of an EVM
//! wallet. It backfills past transactions and contract events, follows the
//! indexer's realtime feed and new blocks, and logs every consolidated state
//! update until interrupted.
//!
//! # Flow
//! 1. Loads the configuration file (optional) and `SYNC_*` environment overrides
//! 2. Initializes the chain adapter, the indexer client and the sync components
//! 3. Opens the wallet and starts synchronizing the address from `--from-block`
//! 4. Watches the address balance
//! 5. Handles graceful shutdown on Ctrl+C

use std::{
	env::{set_var, var},
	path::PathBuf,
};

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use dotenvy::dotenv;
use tracing::{error, info};

use wallet_tx_sync::{
	bootstrap::{initialize_services, load_config, spawn_event_logger},
	utils::{logging::setup_logging, metrics::server::create_metrics_server},
};

/// Main entry point for the wallet synchronization service.
///
/// # Errors
/// Returns an error if the configuration is invalid or the initial sync fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let matches = Command::new("wallet-tx-sync")
		.version(env!("CARGO_PKG_VERSION"))
		.about(
			"Keeps the transaction history of an EVM wallet address in sync from a chain node and \
			 a transaction indexer.",
		)
		.arg(
			Arg::new("address")
				.long("address")
				.help("Address to synchronize")
				.value_name("ADDRESS")
				.required(true),
		)
		.arg(
			Arg::new("wallet-id")
				.long("wallet-id")
				.help("Identifier of the wallet the address belongs to (default: default)")
				.value_name("WALLET_ID"),
		)
		.arg(
			Arg::new("from-block")
				.long("from-block")
				.help("First block to backfill (default: 0)")
				.value_name("BLOCK_NUMBER"),
		)
		.arg(
			Arg::new("config")
				.long("config")
				.help("Path to a JSON configuration file")
				.value_name("PATH"),
		)
		.arg(
			Arg::new("rpc-url")
				.long("rpc-url")
				.help("JSON-RPC endpoint of the chain node")
				.value_name("URL"),
		)
		.arg(
			Arg::new("indexer-url")
				.long("indexer-url")
				.help("Base URL of the transaction indexer")
				.value_name("URL"),
		)
		.arg(
			Arg::new("log-file")
				.long("log-file")
				.help("Write logs to file instead of stdout")
				.action(ArgAction::SetTrue),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.help("Set log level (trace, debug, info, warn, error)")
				.value_name("LEVEL"),
		)
		.arg(
			Arg::new("log-path")
				.long("log-path")
				.help("Path to store log files (default: logs/)")
				.value_name("PATH"),
		)
		.arg(
			Arg::new("metrics")
				.long("metrics")
				.help("Enable metrics server")
				.action(ArgAction::SetTrue),
		)
		.arg(
			Arg::new("metrics-address")
				.long("metrics-address")
				.help("Address to start the metrics server on (default: 127.0.0.1:8081)")
				.value_name("HOST:PORT"),
		)
		.get_matches();

	// Load environment variables from .env file
	dotenv().ok();

	// Only apply CLI options if the corresponding environment variables are NOT already set
	if matches.get_flag("log-file") && var("LOG_MODE").is_err() {
		set_var("LOG_MODE", "file");
	}

	if let Some(level) = matches.get_one::<String>("log-level") {
		if var("RUST_LOG").is_err() {
			set_var("RUST_LOG", level);
		}
	}

	if let Some(path) = matches.get_one::<String>("log-path") {
		if var("LOG_DATA_DIR").is_err() {
			set_var("LOG_DATA_DIR", path);
		}
	}

	if let Some(url) = matches.get_one::<String>("rpc-url") {
		if var("SYNC_RPC_URL").is_err() {
			set_var("SYNC_RPC_URL", url);
		}
	}

	if let Some(url) = matches.get_one::<String>("indexer-url") {
		if var("SYNC_INDEXER_URL").is_err() {
			set_var("SYNC_INDEXER_URL", url);
		}
	}

	setup_logging().unwrap_or_else(|e| {
		error!("Failed to setup logging: {}", e);
	});

	let config_path = matches.get_one::<String>("config").map(PathBuf::from);
	let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

	let address = matches
		.get_one::<String>("address")
		.cloned()
		.ok_or_else(|| anyhow::anyhow!("--address is required"))?;
	let wallet_id = matches
		.get_one::<String>("wallet-id")
		.cloned()
		.unwrap_or_else(|| "default".to_string());
	let from_block = matches
		.get_one::<String>("from-block")
		.map(|s| {
			s.parse::<u64>().map_err(|e| {
				error!("Failed to parse block number: {}", e);
				e
			})
		})
		.transpose()?
		.unwrap_or(0);

	let orchestrator = initialize_services(&config).context("Failed to initialize services")?;
	let logger = spawn_event_logger(orchestrator.bus());

	let metrics_enabled =
		matches.get_flag("metrics") || var("METRICS_ENABLED").map(|v| v == "true").unwrap_or(false);
	let metrics_address = matches
		.get_one::<String>("metrics-address")
		.cloned()
		.unwrap_or_else(|| "127.0.0.1:8081".to_string());

	let metrics_server = if metrics_enabled {
		info!("Metrics server enabled, starting on {}", metrics_address);
		match create_metrics_server(&metrics_address) {
			Ok(server) => Some(server),
			Err(e) => {
				error!("Failed to create metrics server: {}", e);
				None
			}
		}
	} else {
		info!("Metrics server disabled. Use --metrics flag or METRICS_ENABLED=true to enable");
		None
	};

	orchestrator.bus().open_wallet(wallet_id.as_str());
	info!(wallet_id = %wallet_id, address = %address, from_block, "starting synchronization");

	let head = orchestrator.sync_transactions(from_block, &address).await;
	match head {
		Ok(head) => info!(head, "backfill complete, following new blocks"),
		Err(e) => {
			error!("Initial synchronization failed: {}", e);
			orchestrator.stop().await;
			logger.abort();
			return Err(e.into());
		}
	}
	orchestrator.watch_balance(&address);

	info!("Service started. Press Ctrl+C to shutdown");

	let ctrl_c = tokio::signal::ctrl_c();

	if let Some(metrics_future) = metrics_server {
		tokio::select! {
			result = ctrl_c => {
				if let Err(e) = result {
					error!("Error waiting for Ctrl+C: {}", e);
				}
				info!("Shutdown signal received, stopping services...");
			}
			result = metrics_future => {
				if let Err(e) = result {
					error!("Metrics server error: {}", e);
				}
				info!("Metrics server stopped, shutting down services...");
			}
		}
	} else {
		let _ = ctrl_c.await;
		info!("Shutdown signal received, stopping services...");
	}

	orchestrator.stop().await;
	logger.abort();

	info!("Shutdown complete");
	Ok(())
}
