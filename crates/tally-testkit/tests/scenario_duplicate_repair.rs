use std::sync::Arc;

use tally_schemas::SeriesSpec;
use tally_sequence::{AllocatorPolicy, SequenceAllocator};
use tally_testkit::{aggregate, MemoryStore};

fn orders(store: MemoryStore) -> SequenceAllocator<MemoryStore> {
    SequenceAllocator::new(Arc::new(store), [SeriesSpec::orders()], AllocatorPolicy::default())
}

#[tokio::test]
async fn earliest_record_keeps_its_number() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let middle = aggregate("orders", "SAFT-00002", "10.00", 20)?;
    let earliest = aggregate("orders", "SAFT-00002", "10.00", 5)?;
    let latest = aggregate("orders", "SAFT-00002", "10.00", 30)?;
    let unique = aggregate("orders", "SAFT-00001", "10.00", 0)?;
    for r in [&middle, &earliest, &latest, &unique] {
        store.insert_aggregate(r.clone());
    }
    let alloc = orders(store);

    let report = alloc.repair_duplicates("orders").await?;

    assert_eq!(report.scanned, 4);
    assert_eq!(report.duplicate_groups, 1);
    let moved: Vec<_> = report.renumbered.iter().map(|r| r.aggregate_id).collect();
    assert_eq!(moved, [middle.aggregate_id, latest.aggregate_id]);
    assert!(report.renumbered.iter().all(|r| r.old_number == "SAFT-00002"));

    let store = alloc.store();
    assert_eq!(store.aggregate(earliest.aggregate_id).map(|r| r.number), Some("SAFT-00002".into()));
    assert_eq!(store.aggregate(middle.aggregate_id).map(|r| r.number), Some("SAFT-00003".into()));
    assert_eq!(store.aggregate(latest.aggregate_id).map(|r| r.number), Some("SAFT-00004".into()));
    assert_eq!(store.aggregate(unique.aggregate_id).map(|r| r.number), Some("SAFT-00001".into()));
    Ok(())
}

#[tokio::test]
async fn repair_is_idempotent() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert_aggregate(aggregate("orders", "SAFT-00009", "1.00", 0)?);
    store.insert_aggregate(aggregate("orders", "SAFT-00009", "1.00", 1)?);
    let alloc = orders(store);

    let first = alloc.repair_duplicates("orders").await?;
    assert_eq!(first.renumbered.len(), 1);
    assert_eq!(first.renumbered[0].new_number, "SAFT-00010");

    let second = alloc.repair_duplicates("orders").await?;
    assert!(second.is_clean());
    assert_eq!(second.scanned, 2);
    assert_eq!(alloc.store().counter("orders").map(|c| c.last_issued), Some(10));
    Ok(())
}

#[tokio::test]
async fn clean_series_is_left_untouched() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert_aggregate(aggregate("orders", "SAFT-00001", "1.00", 0)?);
    store.insert_aggregate(aggregate("orders", "SAFT-00002", "1.00", 1)?);
    let alloc = orders(store);

    let report = alloc.repair_duplicates("orders").await?;

    assert!(report.is_clean());
    assert_eq!(alloc.store().cas_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn repair_fails_instead_of_issuing_degraded_numbers() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert_aggregate(aggregate("orders", "SAFT-00003", "1.00", 0)?);
    store.insert_aggregate(aggregate("orders", "SAFT-00003", "1.00", 1)?);
    let alloc = orders(store);
    alloc.repair_duplicates("orders").await?;

    alloc.store().insert_aggregate(aggregate("orders", "SAFT-00004", "1.00", 2)?);
    alloc
        .store()
        .fail_counters(Some(tally_schemas::StoreError::Unavailable("down".into())));

    assert!(alloc.repair_duplicates("orders").await.is_err());
    Ok(())
}
