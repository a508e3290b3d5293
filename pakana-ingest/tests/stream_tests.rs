//! Live ledger ingestion through the stream adapter.

use std::sync::Arc;
use std::time::Duration;

use pakana_core::codec;
use pakana_core::Blocklist;
use pakana_ingest::{EngineConfig, HydrationEngine, IngestOutcome, StreamConfig};
use pakana_test_utils::assertions::assert_hash_index_consistent;
use pakana_test_utils::*;

type Engine = HydrationEngine<FaultyStore, FakeLedgerSource>;

fn setup() -> (Arc<FaultyStore>, Arc<FakeLedgerSource>, Engine) {
    let store = Arc::new(FaultyStore::new(MemoryTreeStore::new()));
    let source = Arc::new(FakeLedgerSource::new());
    let engine = HydrationEngine::new(
        Arc::clone(&store),
        Arc::clone(&source),
        Blocklist::parse("GBAD"),
        EngineConfig::default().without_backfill(),
    );
    (store, source, engine)
}

fn fast_reconnect() -> StreamConfig {
    StreamConfig::default()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(0.0)
}

#[tokio::test]
async fn test_ingest_commits_filtered_ledger() -> Result<(), HydrateError> {
    let (store, source, engine) = setup();
    source.add_transactions(vec![
        fixtures::transaction("aa", 100, "GA"),
        fixtures::transaction("bad", 100, "GBAD"),
        fixtures::transaction("bb", 100, "GB"),
    ]);
    let adapter = engine.stream_adapter(StreamConfig::default());

    let outcome = adapter.ingest(&fixtures::ledger_event(100)).await;

    assert_eq!(outcome, IngestOutcome::Committed { transactions: 2 });
    let ledger = engine.reader().ledger(100)?.expect("ledger 100 stored");
    assert_eq!(ledger.filtered_tx_count, 2);
    assert_eq!(engine.reader().latest()?, Some(100));
    assert!(!engine.reader().is_indexed("bad")?);
    assert_eq!(engine.stats().ledgers_ingested, 1);
    assert_hash_index_consistent(store.as_ref());
    Ok(())
}

#[tokio::test]
async fn test_present_ledger_is_not_fetched_again() {
    let (_store, source, engine) = setup();
    let adapter = engine.stream_adapter(StreamConfig::default());
    let event = fixtures::ledger_event(8);

    adapter.ingest(&event).await;
    let pages = source.calls(UpstreamOp::Page);
    let outcome = adapter.ingest(&event).await;

    assert_eq!(outcome, IngestOutcome::AlreadyPresent);
    assert_eq!(source.calls(UpstreamOp::Page), pages);
}

#[tokio::test]
async fn test_failed_commit_is_skipped_and_latest_holds() -> Result<(), HydrateError> {
    let (store, source, engine) = setup();
    source.add_transactions(vec![
        fixtures::transaction("in100", 100, "GA"),
        fixtures::transaction("in101", 101, "GA"),
    ]);
    source.push_connection(vec![
        Ok(fixtures::ledger_event(100)),
        Ok(fixtures::ledger_event(101)),
    ]);
    store.set_fault(Fault::UnderPath(codec::ledger_path(101)));
    let adapter = engine.stream_adapter(StreamConfig::default());

    let events = source
        .stream_ledgers("now")
        .await
        .expect("scripted connection");
    let mut cursor = "now".to_string();
    let seen = adapter.consume(events, &mut cursor).await;

    assert_eq!(seen, 2);
    assert_eq!(cursor, "pt-101");
    assert!(engine.reader().ledger(100)?.is_some());
    assert!(engine.reader().ledger(101)?.is_none());
    assert!(!engine.reader().is_indexed("in101")?);
    assert_eq!(engine.reader().latest()?, Some(100));
    assert_eq!(store.aborts(), 1);
    assert_hash_index_consistent(store.as_ref());
    Ok(())
}

#[tokio::test]
async fn test_upstream_failure_skips_ledger() -> Result<(), HydrateError> {
    let (store, source, engine) = setup();
    source.set_unavailable(UpstreamOp::Page, true);
    let adapter = engine.stream_adapter(StreamConfig::default());

    let outcome = adapter.ingest(&fixtures::ledger_event(12)).await;

    assert!(matches!(outcome, IngestOutcome::Failed { .. }));
    assert!(store.inner().is_empty()?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_reconnects_from_last_cursor() -> Result<(), HydrateError> {
    let (_store, source, engine) = setup();
    source.push_connection(vec![
        Ok(fixtures::ledger_event(5)),
        Err(UpstreamError::transient("connection reset")),
    ]);
    source.push_connection(vec![Ok(fixtures::ledger_event(6))]);
    let adapter = engine.stream_adapter(fast_reconnect());

    adapter.run(tokio::time::sleep(Duration::from_millis(200))).await;

    let cursors = source.stream_cursors();
    assert_eq!(&cursors[..3], &["now", "pt-5", "pt-6"]);
    assert!(cursors[3..].iter().all(|c| c == "pt-6"));
    assert!(engine.reader().ledger(5)?.is_some());
    assert!(engine.reader().ledger(6)?.is_some());
    assert_eq!(engine.reader().latest()?, Some(6));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_run_honors_configured_start_cursor() {
    let (_store, source, engine) = setup();
    let adapter = engine.stream_adapter(fast_reconnect().with_start_cursor("12345"));

    adapter.run(tokio::time::sleep(Duration::from_millis(20))).await;

    assert_eq!(source.stream_cursors()[0], "12345");
}
