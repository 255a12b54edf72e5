//! Integration tests for the consolidation queue.
//!
//! Time is paused so debounce windows elapse deterministically.

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use serde_json::json;

use wallet_tx_sync::{
	models::{AddressUpdate, Meta, WalletStateChanged, CONTRACT_CALL_FAILED_KEY},
	services::{
		blockchain::{hash_to_string, BlockChainError},
		bus::EventBus,
		queue::{ConsolidationQueue, QueueConfig, QueueError, QUEUE_PLUGIN},
	},
	utils::tests::{
		event_name_meta_parser, tx_hash, RawEventBuilder, ReceiptBuilder, TransactionBuilder,
	},
};

use crate::integration::mocks::{with_known_transactions, MockCoinAdapter};

const ADDRESS: &str = "0xaAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa";

fn config() -> QueueConfig {
	QueueConfig {
		debounce: Duration::from_millis(300),
		not_found_retries: 3,
		not_found_backoff: Duration::from_millis(10),
	}
}

fn queue_with(adapter: MockCoinAdapter) -> (ConsolidationQueue, EventBus) {
	let bus = EventBus::new();
	bus.open_wallet("wallet-1");
	let queue = ConsolidationQueue::new(Arc::new(adapter), bus.clone(), config());
	(queue, bus)
}

fn records(update: &WalletStateChanged) -> Vec<(String, Meta)> {
	match &update.update {
		AddressUpdate::Transactions(records) => records
			.iter()
			.map(|record| {
				(
					hash_to_string(&record.transaction.hash),
					record.meta.clone(),
				)
			})
			.collect(),
		AddressUpdate::Balance(_) => panic!("unexpected balance update"),
	}
}

#[tokio::test(start_paused = true)]
async fn test_single_hash_is_emitted_with_receipt_meta_only() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();
	let mut activity = bus.subscribe_coin_tx();

	queue
		.add_transaction(ADDRESS, None, &tx_hash(1))
		.await
		.unwrap();

	let update = states.recv().await.unwrap();
	assert_eq!(update.wallet_id, "wallet-1");
	assert_eq!(update.address, ADDRESS);
	let mut expected = Meta::new();
	expected.insert(CONTRACT_CALL_FAILED_KEY.to_string(), json!(false));
	assert_eq!(records(&update), vec![(tx_hash(1), expected)]);
	assert_eq!(activity.recv().await.unwrap().address, ADDRESS);
}

#[tokio::test(start_paused = true)]
async fn test_event_and_bare_hash_are_consolidated() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let event = RawEventBuilder::new()
		.transaction_hash(&tx_hash(2))
		.value("value", json!("10"))
		.build();
	let from_event = queue.add_event(ADDRESS, event_name_meta_parser(), event);
	// the same hash in another case belongs to the same record
	let bare = queue.add_transaction(ADDRESS, None, &tx_hash(2).to_uppercase().replace("0X", "0x"));

	from_event.await.unwrap();
	bare.await.unwrap();

	let update = states.recv().await.unwrap();
	let records = records(&update);
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].1.get("transfer"), Some(&json!({"value": "10"})));
	assert!(states.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_notifications_within_debounce_emit_once() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let completions: Vec<_> = (1..=3)
		.map(|byte| queue.add_transaction(ADDRESS, None, &tx_hash(byte)))
		.collect();
	futures::future::try_join_all(completions).await.unwrap();

	let update = states.recv().await.unwrap();
	let hashes: Vec<String> = records(&update).into_iter().map(|(hash, _)| hash).collect();
	assert_eq!(hashes, vec![tx_hash(1), tx_hash(2), tx_hash(3)]);
	assert!(states.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_caller_meta_is_kept_across_flushes() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let meta = json!({"label": "rent"}).as_object().cloned();
	queue
		.add_transaction(ADDRESS, meta, &tx_hash(4))
		.await
		.unwrap();
	states.recv().await.unwrap();

	queue
		.add_transaction(ADDRESS, None, &tx_hash(4))
		.await
		.unwrap();
	let update = states.recv().await.unwrap();
	assert_eq!(records(&update)[0].1.get("label"), Some(&json!("rent")));
	assert_eq!(
		queue.meta_cache().get(&tx_hash(4)),
		json!({"label": "rent"}).as_object().cloned()
	);
}

#[tokio::test(start_paused = true)]
async fn test_addresses_flush_independently() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let first = queue.add_transaction(ADDRESS, None, &tx_hash(1));
	let second = queue.add_transaction("0x00000000000000000000000000000000000000bb", None, &tx_hash(2));
	first.await.unwrap();
	second.await.unwrap();

	let mut addresses = vec![
		states.recv().await.unwrap().address,
		states.recv().await.unwrap().address,
	];
	addresses.sort();
	assert_eq!(
		addresses,
		vec![
			"0x00000000000000000000000000000000000000bb".to_string(),
			ADDRESS.to_string()
		]
	);
}

#[tokio::test(start_paused = true)]
async fn test_flush_without_wallet_rejects() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let bus = EventBus::new();
	let queue = ConsolidationQueue::new(Arc::new(adapter), bus.clone(), config());
	let mut states = bus.subscribe_wallet_state();
	let mut errors = bus.subscribe_wallet_errors();

	let result = queue.add_transaction(ADDRESS, None, &tx_hash(1)).await;
	assert_eq!(
		result,
		Err(QueueError::NoWalletContext("Wallet ID not set".to_string()))
	);
	assert!(states.try_recv().is_err());

	// callers that dropped their completion still learn about the loss
	let error = errors.try_recv().unwrap();
	assert_eq!(error.plugin, QUEUE_PLUGIN);
	assert_eq!(error.message, "Could not emit event transaction");
	assert_eq!(error.inner, "Wallet ID not set");
}

#[tokio::test(start_paused = true)]
async fn test_unretrievable_body_reports_deferral() {
	let mut adapter = MockCoinAdapter::new();
	adapter.expect_get_transaction().returning(|_| Ok(None));
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));
	let (queue, _bus) = queue_with(adapter);

	let pending = queue.add_transaction(ADDRESS, None, &tx_hash(6));
	assert_eq!(pending.settled_or_deferred().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_missing_body_is_deferred_until_retrievable() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut adapter = MockCoinAdapter::new();
	adapter.expect_get_transaction().returning({
		let calls = calls.clone();
		move |hash| {
			if calls.fetch_add(1, Ordering::SeqCst) == 0 {
				Ok(None)
			} else {
				Ok(Some(TransactionBuilder::new().hash(hash).build()))
			}
		}
	});
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let first = tokio::spawn(queue.add_transaction(ADDRESS, None, &tx_hash(5)));
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert!(states.try_recv().is_err());
	assert!(!first.is_finished());

	queue
		.add_transaction(ADDRESS, None, &tx_hash(5))
		.await
		.unwrap();
	first.await.unwrap().unwrap();

	let update = states.recv().await.unwrap();
	assert_eq!(records(&update).len(), 1);
	// no receipt yet, so the record can not be flagged as failed
	match &update.update {
		AddressUpdate::Transactions(records) => {
			assert!(records[0].receipt.is_none());
			assert!(!records[0].contract_call_failed);
		}
		AddressUpdate::Balance(_) => unreachable!(),
	}
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_retried() {
	let calls = Arc::new(AtomicUsize::new(0));
	let mut adapter = MockCoinAdapter::new();
	adapter.expect_get_transaction().returning({
		let calls = calls.clone();
		move |hash| {
			if calls.fetch_add(1, Ordering::SeqCst) < 2 {
				Err(BlockChainError::not_found(hash.to_string()))
			} else {
				Ok(Some(TransactionBuilder::new().hash(hash).build()))
			}
		}
	});
	adapter.expect_get_transaction_receipt().returning(|hash| {
		Ok(Some(
			ReceiptBuilder::new()
				.transaction_hash(hash)
				.status(Some(false))
				.build(),
		))
	});
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	queue
		.add_transaction(ADDRESS, None, &tx_hash(6))
		.await
		.unwrap();

	assert_eq!(calls.load(Ordering::SeqCst), 3);
	match states.recv().await.unwrap().update {
		AddressUpdate::Transactions(records) => assert!(records[0].contract_call_failed),
		AddressUpdate::Balance(_) => unreachable!(),
	}
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_rejects_and_reports() {
	let mut adapter = MockCoinAdapter::new();
	adapter
		.expect_get_transaction()
		.returning(|_| Err(BlockChainError::connection_error("connection refused")));
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));
	let (queue, bus) = queue_with(adapter);
	let mut errors = bus.subscribe_wallet_errors();
	let mut states = bus.subscribe_wallet_state();

	let result = queue.add_transaction(ADDRESS, None, &tx_hash(7)).await;
	assert!(matches!(result, Err(QueueError::FetchError(_))));

	let error = errors.recv().await.unwrap();
	assert_eq!(error.plugin, QUEUE_PLUGIN);
	assert_eq!(error.message, "Could not emit event transaction");
	assert!(error.inner.contains("connection refused"));
	assert!(states.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_and_refuses() {
	let mut adapter = MockCoinAdapter::new();
	with_known_transactions(&mut adapter);
	let (queue, bus) = queue_with(adapter);
	let mut states = bus.subscribe_wallet_state();

	let pending = queue.add_transaction(ADDRESS, None, &tx_hash(8));
	queue.shutdown().await;
	pending.await.unwrap();
	assert_eq!(records(&states.recv().await.unwrap()).len(), 1);

	assert!(queue.is_stopped());
	let refused = queue.add_transaction(ADDRESS, None, &tx_hash(9)).await;
	assert!(matches!(refused, Err(QueueError::Stopped(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_deferred_notifications() {
	let mut adapter = MockCoinAdapter::new();
	adapter.expect_get_transaction().returning(|_| Ok(None));
	adapter
		.expect_get_transaction_receipt()
		.returning(|_| Ok(None));
	let (queue, _bus) = queue_with(adapter);

	let pending = queue.add_transaction(ADDRESS, None, &tx_hash(10));
	queue.shutdown().await;
	assert!(matches!(pending.await, Err(QueueError::Stopped(_))));
}
