#![cfg(feature = "unit-tests")]

mod common;

use common::{MockIndex, MockIndexer, MockSource, collections, reconciler};
use forseti::reconcile::{Disposition, Reconciler, SyncOutcome};

#[tokio::test]
async fn equal_counts_report_in_sync_without_resyncs() {
	let source = MockSource::new(&[("messages", 40), ("conversations", 40)]);
	let index = MockIndex::available(&[("messages", Some(40)), ("conversations", Some(40))]);
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages", "conversations"]),
		source,
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert_eq!(report.disposition, Disposition::Completed);
	assert_eq!(report.statuses.len(), 2);
	assert!(
		report
			.statuses
			.iter()
			.all(|s| s.outcome == SyncOutcome::InSync)
	);
	assert!(indexer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn drifted_collection_gets_exactly_one_resync() {
	// 120 messages in the database, 118 indexed; conversations in sync.
	let source = MockSource::new(&[("messages", 120), ("conversations", 40)]);
	let index = MockIndex::available(&[("messages", Some(118)), ("conversations", Some(40))]);
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages", "conversations"]),
		source,
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert_eq!(report.disposition, Disposition::Completed);
	let messages = report
		.statuses
		.iter()
		.find(|s| s.collection.as_str() == "messages")
		.unwrap();
	assert_eq!(messages.outcome, SyncOutcome::Resynced);
	assert_eq!(messages.source_count, Some(120));
	assert_eq!(messages.index_count, Some(118));

	let conversations = report
		.statuses
		.iter()
		.find(|s| s.collection.as_str() == "conversations")
		.unwrap();
	assert_eq!(conversations.outcome, SyncOutcome::InSync);

	assert_eq!(*indexer.calls.lock().unwrap(), vec!["messages"]);
}

#[tokio::test]
async fn unavailable_index_blocks_counts_and_resyncs() {
	let source = MockSource::new(&[("messages", 120)]);
	let index = MockIndex::unavailable("maintenance");
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages", "conversations"]),
		source.clone(),
		index.clone(),
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert_eq!(report.disposition, Disposition::IndexUnavailable);
	assert!(
		report
			.statuses
			.iter()
			.all(|s| s.outcome == SyncOutcome::IndexUnavailable)
	);
	assert!(source.count_calls.lock().unwrap().is_empty());
	assert!(index.stats_calls.lock().unwrap().is_empty());
	assert!(indexer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_health_probe_counts_as_unavailable() {
	let source = MockSource::new(&[("messages", 120)]);
	let index = MockIndex::health_error();
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages"]),
		source.clone(),
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert_eq!(report.disposition, Disposition::IndexUnavailable);
	assert!(source.count_calls.lock().unwrap().is_empty());
	assert!(indexer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disabled_reconciler_is_a_pure_no_op() {
	let r = Reconciler::disabled();
	assert!(!r.is_enabled());

	let report = r.reconcile().await;
	assert_eq!(report.disposition, Disposition::Disabled);
	assert!(report.statuses.is_empty());

	// Shutdown on a disabled reconciler is also inert.
	r.shutdown();
}

#[tokio::test]
async fn source_failure_aborts_the_pass() {
	let source = MockSource::failing();
	let index = MockIndex::available(&[("messages", Some(10))]);
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages"]),
		source,
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert!(matches!(report.disposition, Disposition::Aborted(_)));
	assert!(report.statuses.is_empty());
	assert!(indexer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stats_failure_aborts_the_pass() {
	let source = MockSource::new(&[("messages", 10)]);
	let index = MockIndex::stats_error();
	let indexer = MockIndexer::arc();
	let r = reconciler(
		collections(&["messages"]),
		source,
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert!(matches!(report.disposition, Disposition::Aborted(_)));
	assert!(indexer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resync_failure_does_not_block_other_collections() {
	let source = MockSource::new(&[("messages", 120), ("conversations", 50)]);
	let index = MockIndex::available(&[("messages", Some(118)), ("conversations", Some(40))]);
	let indexer = MockIndexer::failing_on(&["messages"]);
	let r = reconciler(
		collections(&["messages", "conversations"]),
		source,
		index,
		indexer.clone(),
		50,
	);

	let report = r.reconcile().await;

	assert_eq!(report.disposition, Disposition::Completed);
	let messages = report
		.statuses
		.iter()
		.find(|s| s.collection.as_str() == "messages")
		.unwrap();
	assert_eq!(messages.outcome, SyncOutcome::ResyncFailed);

	let conversations = report
		.statuses
		.iter()
		.find(|s| s.collection.as_str() == "conversations")
		.unwrap();
	assert_eq!(conversations.outcome, SyncOutcome::Resynced);

	assert_eq!(
		*indexer.calls.lock().unwrap(),
		vec!["messages", "conversations"]
	);
}

#[tokio::test]
async fn report_serializes_to_json() {
	let source = MockSource::new(&[("messages", 40)]);
	let index = MockIndex::available(&[("messages", Some(40))]);
	let r = reconciler(
		collections(&["messages"]),
		source,
		index,
		MockIndexer::arc(),
		50,
	);

	let report = r.reconcile().await;
	let json = serde_json::to_value(&report).unwrap();

	assert_eq!(json["disposition"], "Completed");
	assert_eq!(json["statuses"][0]["collection"], "messages");
	assert_eq!(json["statuses"][0]["outcome"], "InSync");
	assert_eq!(json["statuses"][0]["source_count"], 40);
}
