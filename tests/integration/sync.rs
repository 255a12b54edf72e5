//! Integration tests for the sync orchestrator.
//!
//! The orchestrator is assembled by the bootstrap code around mocked chain
//! and indexer clients.

use std::{
	collections::HashSet,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use alloy::primitives::U256;
use futures::{stream, StreamExt};
use serde_json::json;
use tokio::{sync::broadcast, time::timeout};

use wallet_tx_sync::{
	bootstrap::assemble,
	models::{
		AddressUpdate, EvmLog, EvmReceipt, SyncConfig, TransactionRecord, WalletStateChanged,
	},
	services::{
		blockchain::{hash_to_string, BlockChainError},
		bus::EventBus,
		indexer::{FeedEvent, IndexerError, INDEXER_PLUGIN},
		queue::QUEUE_PLUGIN,
		sync::{
			try_parse_event_log, Submission, SyncError, SyncOrchestrator, BALANCE_PLUGIN,
			EVENTS_PLUGIN,
		},
	},
	utils::tests::{
		address, transfer_log, tx_hash, DescriptorBuilder, RawEventBuilder, ReceiptBuilder,
		TransactionBuilder,
	},
};

use crate::integration::mocks::{
	header, with_address_helpers, with_known_transactions, with_silent_subscriptions,
	MockCoinAdapter, MockIndexerApi,
};

const WAIT: Duration = Duration::from_secs(5);

fn wallet_address() -> String {
	address(0xaa).to_checksum(None)
}

fn contract_address() -> String {
	address(0xcc).to_checksum(None)
}

fn config() -> SyncConfig {
	SyncConfig {
		debounce_ms: 20,
		not_found_backoff_ms: 5,
		..Default::default()
	}
}

fn orchestrator(adapter: MockCoinAdapter, indexer: MockIndexerApi) -> SyncOrchestrator {
	let bus = EventBus::new();
	bus.open_wallet("wallet-1");
	assemble(Arc::new(adapter), Arc::new(indexer), bus, &config())
}

fn register_transfers_to_owner(orchestrator: &SyncOrchestrator) {
	orchestrator.register_event(Arc::new(|owner: &str| {
		DescriptorBuilder::new()
			.contract_address(&contract_address())
			.filter("to", json!(owner))
			.build()
	}));
}

fn quiet_indexer() -> MockIndexerApi {
	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(|_, _, _| Ok(vec![]));
	indexer
		.expect_get_transaction_stream()
		.returning(|_| Box::pin(stream::pending()));
	indexer
}

fn chain_at(number: u64) -> MockCoinAdapter {
	let mut adapter = MockCoinAdapter::new();
	adapter
		.expect_get_latest_block()
		.returning(move || Ok(header(number)));
	adapter
}

async fn next_records(states: &mut broadcast::Receiver<WalletStateChanged>) -> Vec<TransactionRecord> {
	loop {
		let update = timeout(WAIT, states.recv())
			.await
			.expect("no state update")
			.unwrap();
		if let AddressUpdate::Transactions(records) = update.update {
			return records;
		}
	}
}

/// Collects emitted records until every expected hash was seen
async fn collect_until(
	states: &mut broadcast::Receiver<WalletStateChanged>,
	expected: &[String],
) -> Vec<TransactionRecord> {
	let mut seen = HashSet::new();
	let mut collected = Vec::new();
	while !expected.iter().all(|hash| seen.contains(hash)) {
		for record in next_records(states).await {
			seen.insert(hash_to_string(&record.transaction.hash));
			collected.push(record);
		}
	}
	collected
}

#[tokio::test]
async fn test_sync_backfills_transactions_and_events() {
	let owner = wallet_address();
	let mut adapter = chain_at(100);
	with_silent_subscriptions(&mut adapter);
	with_known_transactions(&mut adapter);
	adapter
		.expect_get_past_events()
		.withf(|_, _, event_name, query| {
			event_name == "Transfer" && query.from_block == Some(0) && query.to_block == Some(100)
		})
		.returning(|_, _, _, _| {
			Ok(vec![RawEventBuilder::new()
				.transaction_hash(&tx_hash(2))
				.value("value", json!("7"))
				.build()])
		});

	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.withf(|from, to, _| *from == 0 && *to == 100)
		.returning(|_, _, _| Ok(vec![tx_hash(1)]));
	indexer
		.expect_get_transaction_stream()
		.returning(|_| Box::pin(stream::pending()));

	let orchestrator = orchestrator(adapter, indexer);
	register_transfers_to_owner(&orchestrator);
	let mut states = orchestrator.bus().subscribe_wallet_state();

	let head = orchestrator.sync_transactions(0, &owner).await.unwrap();
	assert_eq!(head, 100);

	let records = collect_until(&mut states, &[tx_hash(1), tx_hash(2)]).await;
	let from_event = records
		.iter()
		.find(|record| hash_to_string(&record.transaction.hash) == tx_hash(2))
		.unwrap();
	assert_eq!(from_event.meta.get("transfer"), Some(&json!({"value": "7"})));

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_backfill_without_wallet_fails_and_reports() {
	let mut adapter = chain_at(100);
	with_silent_subscriptions(&mut adapter);
	with_known_transactions(&mut adapter);

	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(|_, _, _| Ok(vec![tx_hash(1)]));
	indexer
		.expect_get_transaction_stream()
		.returning(|_| Box::pin(stream::pending()));

	let bus = EventBus::new();
	let orchestrator = assemble(Arc::new(adapter), Arc::new(indexer), bus, &config());
	let mut errors = orchestrator.bus().subscribe_wallet_errors();

	let result = timeout(WAIT, orchestrator.sync_transactions(0, &wallet_address()))
		.await
		.unwrap();
	assert!(matches!(result, Err(SyncError::QueueError(_))));

	let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
	assert_eq!(error.plugin, QUEUE_PLUGIN);
	assert_eq!(error.inner, "Wallet ID not set");

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_backfill_does_not_wait_for_unmined_transactions() {
	let mut adapter = chain_at(100);
	with_silent_subscriptions(&mut adapter);
	adapter.expect_get_transaction().returning(|_| Ok(None));
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));

	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(|_, _, _| Ok(vec![tx_hash(1)]));
	indexer
		.expect_get_transaction_stream()
		.returning(|_| Box::pin(stream::pending()));

	let orchestrator = orchestrator(adapter, indexer);
	let head = timeout(WAIT, orchestrator.sync_transactions(0, &wallet_address()))
		.await
		.unwrap();
	assert_eq!(head, Ok(100));

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_realtime_feed_and_events_reach_the_queue() {
	let owner = wallet_address();
	let mut adapter = chain_at(100);
	with_known_transactions(&mut adapter);
	adapter
		.expect_subscribe_new_heads()
		.returning(|| Box::pin(stream::pending()));
	adapter.expect_subscribe_to_events().returning(|_, _, _, _| {
		stream::iter(vec![Ok(RawEventBuilder::new()
			.transaction_hash(&tx_hash(3))
			.value("value", json!("1"))
			.build())])
		.chain(stream::pending())
		.boxed()
	});
	adapter
		.expect_get_past_events()
		.returning(|_, _, _, _| Ok(vec![]));

	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(|_, _, _| Ok(vec![]));
	indexer.expect_get_transaction_stream().returning(|_| {
		stream::iter(vec![FeedEvent::Tx(tx_hash(4))])
			.chain(stream::pending())
			.boxed()
	});

	let orchestrator = orchestrator(adapter, indexer);
	register_transfers_to_owner(&orchestrator);
	let mut states = orchestrator.bus().subscribe_wallet_state();

	orchestrator.sync_transactions(0, &owner).await.unwrap();
	let records = collect_until(&mut states, &[tx_hash(3), tx_hash(4)]).await;
	assert!(records.iter().any(|record| record.meta.contains_key("transfer")));

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_feed_error_triggers_a_catch_up_scan() {
	let owner = wallet_address();
	let mut adapter = chain_at(100);
	with_silent_subscriptions(&mut adapter);

	let (calls, mut scanned) = tokio::sync::mpsc::unbounded_channel();
	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(move |from, to, _| {
			let _ = calls.send((from, to));
			Ok(vec![])
		});
	indexer.expect_get_transaction_stream().returning(|_| {
		stream::iter(vec![FeedEvent::Error(IndexerError::connection_error(
			"Indexer disconnected with transport close",
		))])
		.chain(stream::pending())
		.boxed()
	});

	let orchestrator = orchestrator(adapter, indexer);
	let mut errors = orchestrator.bus().subscribe_wallet_errors();

	orchestrator.sync_transactions(0, &owner).await.unwrap();
	assert_eq!(timeout(WAIT, scanned.recv()).await.unwrap(), Some((0, 100)));

	let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
	assert_eq!(error.plugin, INDEXER_PLUGIN);
	assert_eq!(error.message, "Failed to sync Ether transactions");

	orchestrator.bus().publish_block(header(105));
	assert_eq!(timeout(WAIT, scanned.recv()).await.unwrap(), Some((100, 105)));

	// synced again, later ticks only advance the cursor
	orchestrator.bus().publish_block(header(106));
	assert!(timeout(Duration::from_millis(200), scanned.recv())
		.await
		.is_err());

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_malformed_feed_frame_is_reported_without_catch_up() {
	let owner = wallet_address();
	let mut adapter = chain_at(100);
	with_silent_subscriptions(&mut adapter);

	let (calls, mut scanned) = tokio::sync::mpsc::unbounded_channel();
	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(move |from, to, _| {
			let _ = calls.send((from, to));
			Ok(vec![])
		});
	indexer.expect_get_transaction_stream().returning(|_| {
		stream::iter(vec![FeedEvent::Error(IndexerError::data_error(
			"Indexer sent bad tx event data",
		))])
		.chain(stream::pending())
		.boxed()
	});

	let orchestrator = orchestrator(adapter, indexer);
	let mut errors = orchestrator.bus().subscribe_wallet_errors();

	orchestrator.sync_transactions(0, &owner).await.unwrap();
	assert_eq!(timeout(WAIT, scanned.recv()).await.unwrap(), Some((0, 100)));

	let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
	assert_eq!(error.plugin, INDEXER_PLUGIN);

	orchestrator.bus().publish_block(header(105));
	assert!(timeout(Duration::from_millis(200), scanned.recv())
		.await
		.is_err());

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_event_subscription_error_is_reported() {
	let owner = wallet_address();
	let mut adapter = chain_at(100);
	adapter
		.expect_subscribe_new_heads()
		.returning(|| Box::pin(stream::pending()));
	adapter.expect_subscribe_to_events().returning(|_, _, _, _| {
		stream::iter(vec![Err(BlockChainError::connection_error("filter expired"))])
			.chain(stream::pending())
			.boxed()
	});
	adapter
		.expect_get_past_events()
		.returning(|_, _, _, _| Ok(vec![]));

	let orchestrator = orchestrator(adapter, quiet_indexer());
	register_transfers_to_owner(&orchestrator);
	let mut errors = orchestrator.bus().subscribe_wallet_errors();

	orchestrator.sync_transactions(0, &owner).await.unwrap();
	let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
	assert_eq!(error.plugin, EVENTS_PLUGIN);
	assert_eq!(error.message, "Failed to sync Transfer events");

	orchestrator.stop().await;
}

fn owned_receipt_adapter() -> MockCoinAdapter {
	let mut adapter = MockCoinAdapter::new();
	with_address_helpers(&mut adapter);
	adapter.expect_get_transaction().returning(|hash| {
		Ok(Some(
			TransactionBuilder::new().hash(hash).build(),
		))
	});
	adapter.expect_get_transaction_receipt().returning(|hash| {
		Ok(Some(
			ReceiptBuilder::new()
				.transaction_hash(hash)
				.from(address(0xaa))
				.to(Some(address(0xcc)))
				.log(transfer_log(address(0xcc), address(0x11), address(0xaa), 5, hash))
				.build(),
		))
	});
	adapter
}

#[tokio::test]
async fn test_refresh_transaction_enqueues_hash_and_events() {
	let owner = wallet_address();
	let orchestrator = orchestrator(owned_receipt_adapter(), quiet_indexer());
	register_transfers_to_owner(&orchestrator);
	let mut states = orchestrator.bus().subscribe_wallet_state();

	orchestrator
		.refresh_transaction(&tx_hash(5), &owner)
		.await
		.unwrap();

	let records = next_records(&mut states).await;
	assert_eq!(records.len(), 1);
	assert_eq!(
		records[0].meta.get("transfer"),
		Some(&json!({
			"from": address(0x11).to_checksum(None),
			"to": owner,
			"value": "5"
		}))
	);
}

#[tokio::test]
async fn test_refresh_transaction_without_receipt_does_nothing() {
	let mut adapter = MockCoinAdapter::new();
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));
	let orchestrator = orchestrator(adapter, quiet_indexer());
	let mut states = orchestrator.bus().subscribe_wallet_state();

	orchestrator
		.refresh_transaction(&tx_hash(5), &wallet_address())
		.await
		.unwrap();
	assert!(states.try_recv().is_err());
}

#[tokio::test]
async fn test_refresh_ignores_foreign_transactions() {
	let mut adapter = MockCoinAdapter::new();
	with_address_helpers(&mut adapter);
	adapter.expect_get_transaction_receipt().returning(|hash| {
		Ok(Some(
			ReceiptBuilder::new()
				.transaction_hash(hash)
				.from(address(0x11))
				.to(Some(address(0x22)))
				.build(),
		))
	});
	let orchestrator = orchestrator(adapter, quiet_indexer());
	let mut states = orchestrator.bus().subscribe_wallet_state();

	orchestrator
		.refresh_transaction(&tx_hash(5), &wallet_address())
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(states.try_recv().is_err());
}

#[tokio::test]
async fn test_refresh_all_transactions_scans_from_genesis() {
	let owner = wallet_address();
	let mut adapter = chain_at(250);
	with_known_transactions(&mut adapter);

	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.withf(|from, to, _| *from == 0 && *to == 250)
		.times(1)
		.returning(|_, _, _| Ok(vec![tx_hash(1), tx_hash(2)]));

	let orchestrator = orchestrator(adapter, indexer);
	let mut states = orchestrator.bus().subscribe_wallet_state();

	assert_eq!(orchestrator.refresh_all_transactions(&owner).await, Ok(250));
	collect_until(&mut states, &[tx_hash(1), tx_hash(2)]).await;
}

#[tokio::test]
async fn test_refresh_all_transactions_reports_scan_failure() {
	let mut indexer = MockIndexerApi::new();
	indexer
		.expect_get_transactions()
		.returning(|_, _, _| Err(IndexerError::request_error("503 Service Unavailable")));

	let orchestrator = orchestrator(chain_at(250), indexer);
	let result = orchestrator.refresh_all_transactions(&wallet_address()).await;
	assert!(matches!(result, Err(SyncError::ScanError(_))));
}

#[tokio::test]
async fn test_log_transaction_waits_for_the_mined_transaction() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let orchestrator = orchestrator(adapter, quiet_indexer());
	let mut states = orchestrator.bus().subscribe_wallet_state();

	let receipt = ReceiptBuilder::new().transaction_hash(&tx_hash(9)).build();
	let submission = Submission::Broadcast {
		tx_hash: tx_hash(9),
		receipt: Box::pin(async move { Ok::<_, BlockChainError>(receipt) }),
	};

	let receipt = orchestrator
		.log_transaction(&wallet_address(), submission)
		.await
		.unwrap();
	assert_eq!(hash_to_string(&receipt.transaction_hash), tx_hash(9));
	collect_until(&mut states, &[tx_hash(9)]).await;
}

#[tokio::test]
async fn test_log_transaction_propagates_receipt_failure() {
	let orchestrator = orchestrator(MockCoinAdapter::new(), quiet_indexer());

	let submission = Submission::ReceiptOnly(Box::pin(async {
		Err::<EvmReceipt, _>(BlockChainError::request_error("transaction underpriced"))
	}));
	let result = orchestrator
		.log_transaction(&wallet_address(), submission)
		.await;
	assert!(matches!(result, Err(SyncError::AdapterError(_))));
}

#[tokio::test]
async fn test_balance_is_refreshed_on_activity() {
	let owner = wallet_address();
	let calls = Arc::new(AtomicUsize::new(0));
	let mut adapter = MockCoinAdapter::new();
	adapter.expect_get_balance().returning({
		let calls = calls.clone();
		move |_| Ok(U256::from(10 + calls.fetch_add(1, Ordering::SeqCst)))
	});
	let orchestrator = orchestrator(adapter, quiet_indexer());
	let mut states = orchestrator.bus().subscribe_wallet_state();

	orchestrator.watch_balance(&owner);
	let first = timeout(WAIT, states.recv()).await.unwrap().unwrap();
	assert_eq!(first.update, AddressUpdate::Balance(U256::from(10)));

	// activity of another address is ignored
	orchestrator
		.bus()
		.publish_coin_tx("0x0000000000000000000000000000000000000001");
	orchestrator.bus().publish_coin_tx(&owner.to_lowercase());
	let second = timeout(WAIT, states.recv()).await.unwrap().unwrap();
	assert_eq!(second.update, AddressUpdate::Balance(U256::from(11)));
	assert_eq!(calls.load(Ordering::SeqCst), 2);

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_balance_failure_is_reported() {
	let mut adapter = MockCoinAdapter::new();
	adapter
		.expect_get_balance()
		.returning(|_| Err(BlockChainError::connection_error("node unreachable")));
	let orchestrator = orchestrator(adapter, quiet_indexer());
	let mut errors = orchestrator.bus().subscribe_wallet_errors();

	orchestrator.watch_balance(&wallet_address());
	let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
	assert_eq!(error.plugin, BALANCE_PLUGIN);
	assert_eq!(error.message, "Could not get ETH balance");

	orchestrator.stop().await;
}

#[tokio::test]
async fn test_stopped_engine_refuses_operations() {
	let orchestrator = orchestrator(MockCoinAdapter::new(), MockIndexerApi::new());
	orchestrator.stop().await;

	assert!(matches!(
		orchestrator.sync_transactions(0, &wallet_address()).await,
		Err(SyncError::StoppedError(_))
	));
	assert!(matches!(
		orchestrator.refresh_all_transactions(&wallet_address()).await,
		Err(SyncError::StoppedError(_))
	));
	assert!(orchestrator.queue().is_stopped());
}

#[test]
fn test_receipt_logs_are_matched_against_descriptors() {
	let mut adapter = MockCoinAdapter::new();
	with_address_helpers(&mut adapter);
	let owner = wallet_address();

	let descriptors = vec![
		DescriptorBuilder::new()
			.contract_address(&contract_address())
			.filter("to", json!(owner))
			.build(),
		DescriptorBuilder::new()
			.contract_address(&contract_address())
			.filter("to", json!(address(0x22).to_checksum(None)))
			.build(),
	];

	let incoming = transfer_log(address(0xcc), address(0x11), address(0xaa), 5, &tx_hash(1));
	let matched = try_parse_event_log(&adapter, &descriptors, &incoming, &tx_hash(1));
	assert_eq!(matched.len(), 1);
	let (descriptor, event) = &matched[0];
	assert_eq!(descriptor.filter.get("to"), Some(&json!(owner)));
	assert_eq!(event.event, "Transfer");
	assert_eq!(event.transaction_hash, tx_hash(1));
	assert_eq!(event.block_number, Some(100));

	// same event emitted by another contract
	let foreign = EvmLog {
		address: address(0xdd),
		..incoming
	};
	assert!(try_parse_event_log(&adapter, &descriptors, &foreign, &tx_hash(1)).is_empty());
}
