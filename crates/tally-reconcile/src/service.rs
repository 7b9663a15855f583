use std::sync::Arc;

use async_trait::async_trait;
use tally_schemas::{AggregateRecord, CatalogItem, LineItem, Money, StoreError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine;
use crate::{BatchOutcome, ReconcileError, ReconcileStatus, ReconciliationResult};

/// Read-only access to active products, in canonical (insertion) order.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn active_catalog(&self) -> Result<Vec<CatalogItem>, StoreError>;
}

/// Aggregate records and their line items.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record with its line items, or `None` if it does not exist.
    async fn fetch_aggregate(&self, aggregate_id: Uuid) -> Result<Option<AggregateRecord>, StoreError>;

    /// All record ids in creation order.
    async fn list_aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Insert `items` as one batch, only if the record has no line items yet.
    /// Either every item commits or none does.
    async fn insert_line_items_if_empty(
        &self,
        aggregate_id: Uuid,
        items: &[LineItem],
    ) -> Result<BatchOutcome, StoreError>;
}

/// Guarantees every aggregate has line items consistent with its total.
///
/// Touches only line items of the record being reconciled.
pub struct Reconciler<L: ?Sized, C: ?Sized> {
    ledger: Arc<L>,
    catalog: Arc<C>,
}

impl<L, C> Reconciler<L, C>
where
    L: LedgerStore + ?Sized,
    C: CatalogLookup + ?Sized,
{
    pub fn new(ledger: Arc<L>, catalog: Arc<C>) -> Self {
        Self { ledger, catalog }
    }

    pub async fn reconcile(&self, aggregate_id: Uuid) -> Result<ReconciliationResult, ReconcileError> {
        let record = self
            .ledger
            .fetch_aggregate(aggregate_id)
            .await?
            .ok_or(ReconcileError::AggregateNotFound(aggregate_id))?;
        self.reconcile_record(&record).await
    }

    /// Idempotent sweep over every aggregate, in creation order.
    ///
    /// Records deleted mid-sweep and records with invalid totals are logged
    /// and left out; ledger failures abort the sweep. Repairs committed
    /// before the abort stay committed but are only reported in the log;
    /// rerunning the sweep picks up where it stopped.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationResult>, ReconcileError> {
        let ids = self.ledger.list_aggregate_ids().await?;
        let mut results = Vec::with_capacity(ids.len());

        for id in ids {
            match self.reconcile(id).await {
                Ok(r) => results.push(r),
                Err(ReconcileError::AggregateNotFound(id)) => {
                    warn!(aggregate_id = %id, "aggregate vanished during sweep");
                }
                Err(e @ ReconcileError::InvalidTotal { .. }) => {
                    error!(aggregate_id = %id, error = %e, "aggregate skipped");
                }
                Err(e) => {
                    let repaired = results.iter().filter(|r| !r.written.is_empty()).count();
                    error!(
                        aggregate_id = %id,
                        error = %e,
                        scanned = results.len(),
                        repaired,
                        "reconcile sweep aborted"
                    );
                    return Err(e);
                }
            }
        }

        let repaired = results.iter().filter(|r| !r.written.is_empty()).count();
        let attention = results.iter().filter(|r| r.status.needs_attention()).count();
        info!(scanned = results.len(), repaired, attention, "reconcile sweep finished");
        Ok(results)
    }

    async fn reconcile_record(&self, record: &AggregateRecord) -> Result<ReconciliationResult, ReconcileError> {
        let catalog = if record.is_settled() || record.total == Money::ZERO {
            Vec::new()
        } else {
            // An unreachable catalog is the same as an empty one; the record
            // stays untouched and is flagged for attention.
            match self.catalog.active_catalog().await {
                Ok(items) => items,
                Err(e) => {
                    warn!(aggregate_id = %record.aggregate_id, error = %e, "catalog lookup failed");
                    Vec::new()
                }
            }
        };

        let plan = engine::plan(record, &catalog)?;
        if plan.items.is_empty() {
            log_status(record, &plan.status);
            return Ok(ReconciliationResult {
                aggregate_id: record.aggregate_id,
                number: record.number.clone(),
                status: plan.status,
                written: Vec::new(),
                residual: Money::ZERO,
            });
        }

        match self
            .ledger
            .insert_line_items_if_empty(record.aggregate_id, &plan.items)
            .await?
        {
            BatchOutcome::Inserted => {
                let residual = plan.residual(record.total);
                log_status(record, &plan.status);
                Ok(ReconciliationResult {
                    aggregate_id: record.aggregate_id,
                    number: record.number.clone(),
                    status: plan.status,
                    written: plan.items,
                    residual,
                })
            }
            BatchOutcome::AlreadyPopulated => {
                // Lost to a concurrent reconciler or writer: verify what is there.
                let current = self
                    .ledger
                    .fetch_aggregate(record.aggregate_id)
                    .await?
                    .ok_or(ReconcileError::AggregateNotFound(record.aggregate_id))?;
                let status = engine::verify(&current);
                log_status(&current, &status);
                Ok(ReconciliationResult {
                    aggregate_id: current.aggregate_id,
                    number: current.number,
                    status,
                    written: Vec::new(),
                    residual: Money::ZERO,
                })
            }
        }
    }
}

fn log_status(record: &AggregateRecord, status: &ReconcileStatus) {
    match status {
        ReconcileStatus::AlreadyConsistent => {}
        ReconcileStatus::RepairedExact => {
            info!(aggregate_id = %record.aggregate_id, number = %record.number, "line items synthesized");
        }
        ReconcileStatus::RepairedApproximate => warn!(
            aggregate_id = %record.aggregate_id,
            number = %record.number,
            total = %record.total,
            "no exact decomposition; wrote approximate line item"
        ),
        ReconcileStatus::NoCatalogAvailable => warn!(
            aggregate_id = %record.aggregate_id,
            number = %record.number,
            "no catalog items available; record left unexplained"
        ),
        ReconcileStatus::AmountMismatch { expected, actual } => warn!(
            aggregate_id = %record.aggregate_id,
            number = %record.number,
            expected = %expected,
            actual = %actual,
            "line items do not sum to total"
        ),
    }
}
