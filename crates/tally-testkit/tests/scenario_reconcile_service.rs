//! Reconciler against the in-memory ledger: synthesized batches, no-op
//! paths, and concurrent reconcilers racing on one record.

use std::sync::Arc;

use futures_util::future::join_all;
use tally_reconcile::{ReconcileError, ReconcileStatus, Reconciler};
use tally_schemas::{Money, StoreError};
use tally_testkit::{aggregate, catalog_item, with_line_item, MemoryStore};
use uuid::Uuid;

fn reconciler(store: &Arc<MemoryStore>) -> Reconciler<MemoryStore, MemoryStore> {
    Reconciler::new(Arc::clone(store), Arc::clone(store))
}

#[tokio::test]
async fn unsettled_record_gets_exact_line_items() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let widget = catalog_item("widget", "25.99")?;
    store.add_catalog_item(widget.clone());
    let rec = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    store.insert_aggregate(rec.clone());

    let result = reconciler(&store).reconcile(rec.aggregate_id).await?;

    assert_eq!(result.status, ReconcileStatus::RepairedExact);
    assert_eq!(result.written.len(), 1);
    assert_eq!(result.written[0].catalog_item_id, widget.catalog_item_id);
    assert_eq!(result.written[0].quantity, 20);
    assert_eq!(result.residual, Money::ZERO);

    let stored = store.aggregate(rec.aggregate_id).expect("record");
    assert_eq!(stored.line_total(), Some(rec.total));
    assert_eq!(stored.number, "SAFT-00001");
    assert_eq!(stored.total, rec.total);
    Ok(())
}

#[tokio::test]
async fn consistent_record_is_not_rewritten() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let widget = catalog_item("widget", "25.99")?;
    store.add_catalog_item(widget.clone());
    let rec = with_line_item(aggregate("orders", "SAFT-00001", "51.98", 0)?, &widget, 2)?;
    store.insert_aggregate(rec.clone());

    let result = reconciler(&store).reconcile(rec.aggregate_id).await?;

    assert_eq!(result.status, ReconcileStatus::AlreadyConsistent);
    assert!(result.written.is_empty());
    assert_eq!(store.batch_inserts(), 0);
    assert_eq!(store.aggregate(rec.aggregate_id), Some(rec));
    Ok(())
}

#[tokio::test]
async fn mismatched_record_is_reported_and_left_alone() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let widget = catalog_item("widget", "25.99")?;
    store.add_catalog_item(widget.clone());
    let rec = with_line_item(aggregate("orders", "SAFT-00001", "527.82", 0)?, &widget, 20)?;
    store.insert_aggregate(rec.clone());

    let result = reconciler(&store).reconcile(rec.aggregate_id).await?;

    assert_eq!(
        result.status,
        ReconcileStatus::AmountMismatch {
            expected: "527.82".parse()?,
            actual: "519.80".parse()?,
        }
    );
    assert!(result.status.needs_attention());
    assert_eq!(store.batch_inserts(), 0);
    assert_eq!(store.aggregate(rec.aggregate_id), Some(rec));
    Ok(())
}

#[tokio::test]
async fn empty_catalog_leaves_record_unexplained() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let inactive = catalog_item("retired", "5.00")?;
    store.add_catalog_item(inactive.clone());
    store.set_catalog_item_active(inactive.catalog_item_id, false);
    let rec = aggregate("orders", "SAFT-00001", "10.00", 0)?;
    store.insert_aggregate(rec.clone());

    let result = reconciler(&store).reconcile(rec.aggregate_id).await?;

    assert_eq!(result.status, ReconcileStatus::NoCatalogAvailable);
    assert!(result.written.is_empty());
    assert!(store.aggregate(rec.aggregate_id).expect("record").line_items.is_empty());
    Ok(())
}

#[tokio::test]
async fn approximate_repair_records_the_residual() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.add_catalog_item(catalog_item("crate", "30.00")?);
    let rec = aggregate("orders", "SAFT-00001", "100.00", 0)?;
    store.insert_aggregate(rec.clone());

    let result = reconciler(&store).reconcile(rec.aggregate_id).await?;

    assert_eq!(result.status, ReconcileStatus::RepairedApproximate);
    assert_eq!(result.written.len(), 1);
    assert_eq!(result.written[0].quantity, 3);
    assert_eq!(result.residual, "10.00".parse()?);
    Ok(())
}

#[tokio::test]
async fn missing_record_is_an_error() {
    let store = Arc::new(MemoryStore::new());

    let err = reconciler(&store).reconcile(Uuid::new_v4()).await.unwrap_err();

    assert!(matches!(err, ReconcileError::AggregateNotFound(_)));
}

#[tokio::test]
async fn sweep_is_idempotent_and_skips_invalid_totals() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let widget = catalog_item("widget", "25.99")?;
    let gizmo = catalog_item("gizmo", "5.00")?;
    store.add_catalog_item(widget.clone());
    store.add_catalog_item(gizmo.clone());

    let a = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    let b = with_line_item(aggregate("orders", "SAFT-00002", "10.00", 1)?, &gizmo, 2)?;
    let c = aggregate("orders", "SAFT-00003", "0", 2)?;
    let mut negative = aggregate("orders", "SAFT-00004", "1.00", 3)?;
    negative.total = Money::from_cents(-100);
    for r in [&a, &b, &c, &negative] {
        store.insert_aggregate(r.clone());
    }
    let rec = reconciler(&store);

    let first = rec.reconcile_all().await?;
    let ids: Vec<_> = first.iter().map(|r| r.aggregate_id).collect();
    assert_eq!(ids, [a.aggregate_id, b.aggregate_id, c.aggregate_id]);
    assert_eq!(first[0].status, ReconcileStatus::RepairedExact);
    assert_eq!(first[1].status, ReconcileStatus::AlreadyConsistent);
    assert_eq!(first[2].status, ReconcileStatus::AlreadyConsistent);
    assert_eq!(store.batch_inserts(), 1);

    let second = rec.reconcile_all().await?;
    assert!(second.iter().all(|r| r.status == ReconcileStatus::AlreadyConsistent));
    assert!(second.iter().all(|r| r.written.is_empty()));
    assert_eq!(store.batch_inserts(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_reconcilers_write_exactly_one_batch() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::interleaved());
    store.add_catalog_item(catalog_item("widget", "25.99")?);
    let rec = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    store.insert_aggregate(rec.clone());
    let reconciler = reconciler(&store);

    let results = join_all((0..8).map(|_| reconciler.reconcile(rec.aggregate_id))).await;

    let mut writers = 0;
    for r in results {
        let r = r?;
        if r.written.is_empty() {
            assert_eq!(r.status, ReconcileStatus::AlreadyConsistent);
        } else {
            writers += 1;
            assert_eq!(r.status, ReconcileStatus::RepairedExact);
        }
    }
    assert_eq!(writers, 1);
    assert_eq!(store.batch_inserts(), 1);
    let stored = store.aggregate(rec.aggregate_id).expect("record");
    assert_eq!(stored.line_items.len(), 1);
    assert_eq!(stored.line_total(), Some(rec.total));
    Ok(())
}

#[tokio::test]
async fn catalog_outage_reads_as_no_catalog() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let widget = catalog_item("widget", "25.99")?;
    store.add_catalog_item(widget.clone());
    let open = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    let settled = with_line_item(aggregate("orders", "SAFT-00002", "51.98", 1)?, &widget, 2)?;
    store.insert_aggregate(open.clone());
    store.insert_aggregate(settled.clone());
    store.fail_catalog(Some(StoreError::Unavailable("catalog down".into())));
    let reconciler = reconciler(&store);

    let single = reconciler.reconcile(open.aggregate_id).await?;
    assert_eq!(single.status, ReconcileStatus::NoCatalogAvailable);
    assert!(single.written.is_empty());

    let swept = reconciler.reconcile_all().await?;
    let statuses: Vec<_> = swept.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![ReconcileStatus::NoCatalogAvailable, ReconcileStatus::AlreadyConsistent]
    );
    assert_eq!(store.batch_inserts(), 0);
    assert_eq!(store.aggregate(open.aggregate_id), Some(open.clone()));

    store.fail_catalog(None);
    let repaired = reconciler.reconcile(open.aggregate_id).await?;
    assert_eq!(repaired.status, ReconcileStatus::RepairedExact);
    Ok(())
}

#[tokio::test]
async fn ledger_failure_is_a_persistence_error() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let rec = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    store.insert_aggregate(rec.clone());
    store.fail_fetch(Some((rec.aggregate_id, StoreError::Unavailable("ledger down".into()))));

    let err = reconciler(&store).reconcile(rec.aggregate_id).await.unwrap_err();

    assert!(matches!(err, ReconcileError::PersistenceFailure(StoreError::Unavailable(_))));
    Ok(())
}

#[tokio::test]
async fn aborted_sweep_keeps_earlier_repairs_and_resumes() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.add_catalog_item(catalog_item("widget", "25.99")?);
    let first = aggregate("orders", "SAFT-00001", "519.80", 0)?;
    let second = aggregate("orders", "SAFT-00002", "51.98", 1)?;
    store.insert_aggregate(first.clone());
    store.insert_aggregate(second.clone());
    store.fail_fetch(Some((second.aggregate_id, StoreError::Unavailable("ledger down".into()))));
    let reconciler = reconciler(&store);

    let err = reconciler.reconcile_all().await.unwrap_err();

    assert!(matches!(err, ReconcileError::PersistenceFailure(StoreError::Unavailable(_))));
    assert_eq!(store.batch_inserts(), 1);
    assert!(store.aggregate(first.aggregate_id).is_some_and(|r| r.is_settled()));

    store.fail_fetch(None);
    let swept = reconciler.reconcile_all().await?;
    let statuses: Vec<_> = swept.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![ReconcileStatus::AlreadyConsistent, ReconcileStatus::RepairedExact]
    );
    assert_eq!(store.batch_inserts(), 2);
    Ok(())
}
