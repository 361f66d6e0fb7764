//! End-to-end scenarios across registry, forest, driver, exporter and ledger.
//!
//! Scenarios covered:
//! - Seeded labels propagate through co-spend merges into the export
//! - The exported CSV table feeds ledger annotation with change and fee rows
//! - A failed batch leaves the previous checkpoint intact and a rerun completes

use std::io::Cursor;

use cairn_core::ledger::{Effect, LedgerAnnotator, LedgerEvent};
use cairn_core::traits::MemorySource;
use cairn_core::types::{BlockView, ClusterAssignment};
use cairn_forest::ClusterStore;
use cairn_node_lib::labels::{read_label_table, CsvClusterSink, LedgerCsvWriter};
use cairn_node_lib::{ClusterConfig, ClusterExporter, ClusteringDriver, DriverError};
use cairn_tests::helpers::*;

fn config(batch_blocks: u64) -> ClusterConfig {
    ClusterConfig {
        batch_blocks,
        checkpoint_interval_blocks: 2,
        export_flush_every: 3,
        ..ClusterConfig::default()
    }
}

/// An exchange hot wallet sweeping deposits, and an unrelated user.
fn scenario() -> Vec<BlockView> {
    vec![
        BlockView {
            height: 0,
            transactions: vec![spend("a0", &[], &[("1Hot", 50), ("1Deposit1", 10)])],
        },
        BlockView {
            height: 1,
            transactions: vec![
                spend("a1", &["1Deposit1", "1Deposit2"], &[("1Hot", 2)]),
                spend("b1", &["bc1quser1", "bc1quser2"], &[("3Shop", 1), ("bc1quser3", 1)]),
            ],
        },
        BlockView {
            height: 2,
            transactions: vec![spend("a2", &["1Hot", "1Deposit3"], &[("1Cold", 2)])],
        },
        BlockView {
            height: 3,
            transactions: vec![spend("a3", &["1Deposit3", "Unknown", "1Deposit1"], &[("1Hot", 3)])],
        },
    ]
}

// ---------------------------------------------------------------------------
// Cluster, export, annotate
// ---------------------------------------------------------------------------

#[test]
fn seeded_label_spreads_to_whole_cluster() {
    let (mut store, _backend) = memory_store();
    store.seed_labels([("1Hot", "Exchange")]).unwrap();

    let mut driver = ClusteringDriver::new(store, MemorySource::new(scenario()), &config(1));
    let report = driver.run(0, 4).unwrap();
    assert_eq!(report.last_block_processed, 4);
    assert_eq!(report.batches, 4);
    assert_eq!(report.stats.transactions, 4);

    let store = driver.store_mut();
    for address in ["1Hot", "1Deposit1", "1Deposit2", "1Deposit3"] {
        assert_eq!(store.resolve_label(address).unwrap().as_deref(), Some("Exchange"));
    }
    assert!(!store.same_cluster("1Hot", "bc1quser1").unwrap());
    assert_eq!(store.lookup("Unknown").unwrap(), None);
    assert_eq!(store.lookup("1Cold").unwrap(), None);

    let mut sink = CsvClusterSink::new(Vec::new()).unwrap();
    let export = ClusterExporter::from_config(&config(1))
        .export(store, &mut sink)
        .unwrap();
    assert_eq!(export.addresses, 6);
    assert_eq!(export.generated_labels, 1);
    assert_eq!(sink.written(), 6);

    let table = read_label_table(Cursor::new(sink.into_inner().unwrap())).unwrap();
    assert_eq!(table.len(), 6);
    assert_eq!(table["1Deposit2"], "Exchange");
    assert!(table["bc1quser1"].starts_with("Wallet-"));
    assert_eq!(table["bc1quser1"], table["bc1quser2"]);
}

#[test]
fn exported_table_drives_ledger_annotation() {
    let (store, _backend) = memory_store();
    let mut driver = ClusteringDriver::new(store, MemorySource::new(scenario()), &config(10));
    driver.run(0, 4).unwrap();

    let mut assignments: Vec<ClusterAssignment> = Vec::new();
    ClusterExporter::new(100)
        .export(driver.store_mut(), &mut assignments)
        .unwrap();
    let mut table: std::collections::HashMap<String, String> = assignments
        .into_iter()
        .map(|a| (a.address, a.label))
        .collect();

    // Two bech32 inputs pay a P2SH output and a bech32 output: the script
    // type match marks output 1 as change, and 2 - 2 leaves no fee.
    let blocks = scenario();
    let events = LedgerAnnotator::annotate_block(&blocks[1], &mut table).unwrap();
    let user_rows: Vec<&LedgerEvent> = events.iter().filter(|e| e.txid == "b1").collect();
    assert_eq!(user_rows.len(), 4);
    let change: Vec<&str> = user_rows
        .iter()
        .filter(|e| e.is_change)
        .map(|e| e.address.as_str())
        .collect();
    assert_eq!(change, vec!["bc1quser3"]);
    assert_eq!(user_rows[0].label, table["bc1quser1"]);

    // Sweep a1 has a single output: no change and, at 2 in and 2 out, no fee.
    let sweep: Vec<&LedgerEvent> = events.iter().filter(|e| e.txid == "a1").collect();
    assert_eq!(sweep.len(), 3);
    assert!(sweep.iter().all(|e| !e.is_change));

    let sort_keys: Vec<u64> = events.iter().map(|e| e.sort_key).collect();
    assert_eq!(sort_keys, (1..=events.len() as u64).collect::<Vec<_>>());

    // The coinbase in block 0 has no debits and never a fee row.
    let coinbase = LedgerAnnotator::annotate_block(&blocks[0], &mut table).unwrap();
    assert!(coinbase.iter().all(|e| e.effect == Effect::Credit));
    assert!(coinbase.iter().all(|e| e.address != "Fee"));

    // Three unit inputs paying out one unit leave a fee row of 2.
    let fee_block = BlockView {
        height: 9,
        transactions: vec![spend("f", &["1Deposit1", "1Deposit2", "1Hot"], &[("1Cold", 1)])],
    };
    let with_fee = LedgerAnnotator::annotate_block(&fee_block, &mut table).unwrap();
    let fee = with_fee.last().unwrap();
    assert_eq!(fee.address, "Fee");
    assert_eq!(fee.value, 2);
    assert_eq!(fee.effect, Effect::Credit);

    let mut writer = LedgerCsvWriter::new(Vec::new()).unwrap();
    writer.write_all(&with_fee).unwrap();
    let csv = String::from_utf8(writer.finish().unwrap()).unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("block_height,txid,sort_key,address,address_prefix,effect,value,label,is_change")
    );
    assert!(lines.next().unwrap().starts_with("9,f,1,1Deposit1,1Depos,-1,1,"));
    assert_eq!(csv.lines().count(), with_fee.len() + 1);
}

// ---------------------------------------------------------------------------
// Failure and resume
// ---------------------------------------------------------------------------

#[test]
fn failed_batch_keeps_previous_checkpoint() {
    let (store, backend) = memory_store();
    let mut driver = ClusteringDriver::new(store, MemorySource::new(scenario()), &config(2));
    let report = driver.run(0, 2).unwrap();
    assert_eq!(report.last_block_processed, 2);

    backend.set_fail_writes(true);
    let err = driver.run(0, 4).unwrap_err();
    match err {
        DriverError::Batch { from, to, .. } => assert_eq!((from, to), (2, 4)),
        other => panic!("unexpected error: {other}"),
    }
    drop(driver);

    backend.set_fail_writes(false);
    let reopened = ClusterStore::open(backend.clone()).unwrap();
    assert_eq!(reopened.last_checkpoint().unwrap().unwrap().last_block_processed, 2);
    assert_eq!(reopened.lookup("1Deposit3").unwrap(), None);

    let mut driver = ClusteringDriver::new(reopened, MemorySource::new(scenario()), &config(2));
    let report = driver.run(0, 4).unwrap();
    assert_eq!(report.started_at, 2);
    assert_eq!(report.batches, 1);
    let store = driver.store_mut();
    assert!(store.same_cluster("1Hot", "1Deposit1").unwrap());
    assert_eq!(store.handle_count(), 6);
    assert!(backend.flush_count() >= 2);
}

#[test]
fn rerunning_a_finished_range_is_a_no_op() {
    let (store, _backend) = memory_store();
    let mut driver = ClusteringDriver::new(store, MemorySource::new(scenario()), &config(3));
    driver.run(0, 4).unwrap();
    let handles = driver.store().handle_count();

    let report = driver.run(0, 4).unwrap();
    assert_eq!(report.batches, 0);
    assert_eq!(report.started_at, 4);
    assert_eq!(driver.store().handle_count(), handles);
}
