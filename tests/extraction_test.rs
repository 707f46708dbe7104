mod common;

use common::*;
use std::collections::HashMap;
use std::io::Cursor;
use sync_relay::checkpoint::CheckpointManager;
use sync_relay::extract::{ProtocolReader, Record, StagingBuffer};
use sync_relay::model::{row, ChangeRecord, Channel, EventKind};
use sync_relay::{Error, Replicator};
use tempfile::TempDir;

fn read_back(text: &str) -> Vec<Record> {
    ProtocolReader::new(Cursor::new(text.as_bytes())).read_all().unwrap()
}

#[test]
fn test_round_trip_preserves_every_event() {
    let capture = capture();
    let histories = capture.history_registry().unwrap();
    let replicator = Replicator::new(test_config(None), routes()).unwrap();
    let outcome = replicator
        .route_changes(&capture.changes, &histories, &capture.nodes, &capture.channels, None)
        .unwrap();
    let by_id: HashMap<u64, &ChangeRecord> =
        capture.changes.iter().map(|c| (c.change_id, c)).collect();

    let batch = &outcome.batches.batches()[0];
    let staged = replicator
        .extract_batch(StagingBuffer::new(), &histories, batch, &by_id)
        .unwrap();
    let records = read_back(&staged.to_text());

    let batch_ids: Vec<u64> = records
        .iter()
        .filter_map(|r| match r {
            Record::Batch(id) => Some(*id),
            _ => None,
        })
        .collect();
    let commit_ids: Vec<u64> = records
        .iter()
        .filter_map(|r| match r {
            Record::Commit(id) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(batch_ids, vec![batch.batch_id]);
    assert_eq!(commit_ids, vec![batch.batch_id]);
    assert_eq!(records.last(), Some(&Record::Commit(batch.batch_id)));

    let events: Vec<&Record> = records.iter().filter(|r| r.is_event()).collect();
    assert_eq!(events.len(), batch.len());
    assert_eq!(
        events,
        vec![
            &Record::Insert(row(&["1", "store-1", "open"])),
            &Record::Delete(row(&["1"])),
        ]
    );
}

#[test]
fn test_round_trip_of_mixed_events_across_tables() {
    let capture = capture();
    let histories = capture.history_registry().unwrap();
    let replicator = Replicator::new(test_config(None), routes()).unwrap();

    let changes = vec![
        order(1, EventKind::Insert).with_row(row(&["1", "store-1", "say \"hi\", ok"])),
        ChangeRecord::new(2, EventKind::Insert, "items", ITEMS_HISTORY, "default")
            .with_row(row(&["10", ""])),
        order(3, EventKind::Update)
            .with_row(row(&["1", "store-1", "shipped"]))
            .with_old(row(&["1", "store-1", "open"])),
        ChangeRecord::new(4, EventKind::Sql, "orders", ORDERS_HISTORY, "default")
            .with_row(row(&["update orders set status = 'void'"])),
    ];
    let mut batch = sync_relay::batch::OutgoingBatch::new(9, "store-1", "default");
    for change in &changes {
        let route_id = if change.table_name == "items" { "corp-items" } else { "corp-orders" };
        batch.push(change.change_id, route_id);
    }
    let by_id: HashMap<u64, &ChangeRecord> = changes.iter().map(|c| (c.change_id, c)).collect();

    let staged = replicator
        .extract_batch(StagingBuffer::new(), &histories, &batch, &by_id)
        .unwrap();
    let records = read_back(&staged.to_text());

    assert_eq!(records.iter().filter(|r| r.is_event()).count(), 4);
    assert!(records.contains(&Record::Insert(row(&["1", "store-1", "say \"hi\", ok"]))));
    assert!(records.contains(&Record::Insert(vec![Some("10".to_string()), None])));
    assert!(records.contains(&Record::Old(row(&["1", "store-1", "open"]))));
    assert!(records.contains(&Record::Update {
        keys: row(&["1"]),
        row: row(&["1", "store-1", "shipped"]),
    }));
    assert!(records.contains(&Record::Sql(Some("update orders set status = 'void'".to_string()))));

    let tables: Vec<&Record> = records
        .iter()
        .filter(|r| matches!(r, Record::Table(_)))
        .collect();
    // orders, items, then a switch back to orders
    assert_eq!(
        tables,
        vec![
            &Record::Table("orders".to_string()),
            &Record::Table("items".to_string()),
            &Record::Table("orders".to_string()),
        ]
    );
    assert_eq!(records.iter().filter(|r| matches!(r, Record::Keys(_))).count(), 2);
}

#[test]
fn test_batch_referencing_missing_change_fails() {
    let capture = capture();
    let histories = capture.history_registry().unwrap();
    let replicator = Replicator::new(test_config(None), routes()).unwrap();
    let mut batch = sync_relay::batch::OutgoingBatch::new(1, "store-1", "default");
    batch.push(42, "corp-orders");

    let result =
        replicator.extract_batch(StagingBuffer::new(), &histories, &batch, &HashMap::new());
    assert!(matches!(result, Err(Error::InvalidState { .. })));
}

#[test]
fn test_reader_rejects_malformed_lines() {
    let unterminated = ProtocolReader::new(Cursor::new("BATCH, 1\nINSERT, \"open\n"));
    assert!(matches!(
        unterminated.read_all(),
        Err(Error::Protocol { line: 2, .. })
    ));

    let unknown = ProtocolReader::new(Cursor::new("NODEID, corp-000\nBOGUS, 1\n"));
    assert!(matches!(unknown.read_all(), Err(Error::Protocol { line: 2, .. })));

    let orphan_update = ProtocolReader::new(Cursor::new("UPDATE, \"1\"\n"));
    assert!(matches!(
        orphan_update.read_all(),
        Err(Error::Protocol { line: 1, .. })
    ));
}

#[tokio::test]
async fn test_full_pass_writes_batch_files_and_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("routing.json");
    let output_dir = temp_dir.path().join("outgoing");
    let capture = capture();
    let replicator = Replicator::new(test_config(Some(checkpoint_path.clone())), routes()).unwrap();

    let summary = replicator.run(&capture, &output_dir).await.unwrap();

    assert_eq!(summary.routed, 4);
    assert_eq!(summary.files.len(), 5);
    let first = std::fs::read_to_string(output_dir.join("store-1-1.csv")).unwrap();
    assert!(first.starts_with("NODEID, corp-000\nBINARY, BASE64\nCHANNEL, default\nBATCH, 1\n"));
    assert!(first.ends_with("COMMIT, 1\n"));

    let saved = CheckpointManager::new(&checkpoint_path)
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.last_change_id, 5);
    assert_eq!(saved.last_batch_id, 5);

    // Nothing new was captured, so a second pass routes nothing and keeps the cursor
    let second = replicator.run(&capture, &output_dir).await.unwrap();
    assert_eq!(second.routed, 0);
    assert!(second.files.is_empty());
    let saved = CheckpointManager::new(&checkpoint_path)
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.last_change_id, 5);
    assert_eq!(saved.last_batch_id, 5);
}

#[tokio::test]
async fn test_failed_pass_does_not_advance_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("routing.json");
    let mut capture = capture();
    capture.changes.push(
        ChangeRecord::new(6, EventKind::Insert, "items", ORDERS_HISTORY, "config")
            .with_row(row(&["11", "gadget"])),
    );
    let replicator = Replicator::new(test_config(Some(checkpoint_path.clone())), routes()).unwrap();

    let result = replicator.run(&capture, &temp_dir.path().join("outgoing")).await;

    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    assert!(CheckpointManager::new(&checkpoint_path).load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_disabled_channel_is_written_once_enabled() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("routing.json");
    let output_dir = temp_dir.path().join("outgoing");
    let replicator = Replicator::new(test_config(Some(checkpoint_path.clone())), routes()).unwrap();

    let mut capture = capture();
    capture.channels = vec![Channel::new("default", 1), Channel::new("config", 0).disabled()];
    let first = replicator.run(&capture, &output_dir).await.unwrap();

    assert_eq!(first.held_back, 3);
    assert_eq!(
        first.files,
        vec![output_dir.join("store-1-1.csv"), output_dir.join("store-2-5.csv")]
    );
    let saved = CheckpointManager::new(&checkpoint_path).load().await.unwrap().unwrap();
    // item change 2 sits in the held back batches
    assert_eq!(saved.last_change_id, 1);
    assert_eq!(saved.last_batch_id, 5);

    capture.channels = channels();
    let second = replicator.run(&capture, &output_dir).await.unwrap();

    assert_eq!(second.held_back, 0);
    let store3: Vec<_> = second
        .files
        .iter()
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("store-3-"))
        .collect();
    assert_eq!(store3.len(), 1);
    let records = read_back(&std::fs::read_to_string(store3[0]).unwrap());
    assert!(records.contains(&Record::Channel("config".to_string())));
    assert!(records.contains(&Record::Insert(row(&["10", "widget"]))));

    let saved = CheckpointManager::new(&checkpoint_path).load().await.unwrap().unwrap();
    assert_eq!(saved.last_change_id, 5);
    assert!(saved.last_batch_id > 5);
}

#[test]
fn test_multi_line_values_round_trip() {
    let capture = capture();
    let histories = capture.history_registry().unwrap();
    let replicator = Replicator::new(test_config(None), routes()).unwrap();

    let change = order(1, EventKind::Insert).with_row(row(&["1", "store-1", "line1\nline2\r\n"]));
    let mut batch = sync_relay::batch::OutgoingBatch::new(3, "store-1", "default");
    batch.push(1, "corp-orders");
    let by_id: HashMap<u64, &ChangeRecord> = HashMap::from([(1, &change)]);

    let staged = replicator
        .extract_batch(StagingBuffer::new(), &histories, &batch, &by_id)
        .unwrap();
    let text = staged.to_text();
    assert_eq!(text.lines().filter(|l| l.starts_with("INSERT")).count(), 1);

    let records = read_back(&text);
    let expected = row(&["1", "store-1", "line1\nline2\r\n"]);
    assert!(records.contains(&Record::Insert(expected)));
    assert_eq!(records.last(), Some(&Record::Commit(3)));
}
