use serde::{Deserialize, Serialize};
use tally_schemas::{LineItem, Money, StoreError};
use uuid::Uuid;

/// Outcome of reconciling one aggregate record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ReconcileStatus {
    /// Existing line items already sum to the total (or nothing to explain).
    AlreadyConsistent,
    /// Synthesized items reconstruct the total within one cent.
    RepairedExact,
    /// No exact decomposition found; a single rounded line item was written.
    RepairedApproximate,
    /// Record has no items and there is no usable catalog. Record stays
    /// valid but unexplained.
    NoCatalogAvailable,
    /// Existing items disagree with the total. Reported, never overwritten.
    AmountMismatch { expected: Money, actual: Money },
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::AlreadyConsistent => "alreadyConsistent",
            ReconcileStatus::RepairedExact => "repairedExact",
            ReconcileStatus::RepairedApproximate => "repairedApproximate",
            ReconcileStatus::NoCatalogAvailable => "noCatalogAvailable",
            ReconcileStatus::AmountMismatch { .. } => "amountMismatch",
        }
    }

    /// Needs an operator to look at it.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            ReconcileStatus::RepairedApproximate
                | ReconcileStatus::NoCatalogAvailable
                | ReconcileStatus::AmountMismatch { .. }
        )
    }
}

/// What the engine decided for one record; pure, nothing persisted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub status: ReconcileStatus,
    /// Items to write. Empty unless the status is a repair.
    pub items: Vec<LineItem>,
}

impl ReconcilePlan {
    pub fn no_write(status: ReconcileStatus) -> Self {
        Self {
            status,
            items: Vec::new(),
        }
    }

    pub fn residual(&self, total: Money) -> Money {
        let written = self
            .items
            .iter()
            .fold(Money::ZERO, |acc, li| acc.saturating_add(li.total_price));
        total - written
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub aggregate_id: Uuid,
    pub number: String,
    pub status: ReconcileStatus,
    /// Line items persisted by this call.
    pub written: Vec<LineItem>,
    /// `total - sum(written)`; non-zero only for approximate repairs.
    pub residual: Money,
}

/// Result of atomically inserting a synthesized batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Inserted,
    /// Another writer populated the record first; nothing was written.
    AlreadyPopulated,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    #[error("aggregate {aggregate_id} has invalid total {total}")]
    InvalidTotal { aggregate_id: Uuid, total: Money },

    #[error(transparent)]
    PersistenceFailure(#[from] StoreError),
}
