use async_trait::async_trait;
use tally_schemas::{NumberedRecord, SeriesCounter, SeriesSpec, StoreError};
use uuid::Uuid;

/// Result of one conditional commit on a series counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Counter advanced from `expected` to `next`; the candidate is ours.
    Committed,
    /// Another writer moved the counter since our read. Nothing changed.
    Conflict,
    /// Counter advanced (the value is consumed) but a record already carries
    /// the candidate text. Retry with the following value.
    IdentifierTaken,
}

/// Persistence port for series counters and numbered records.
///
/// Implementations must make `compare_and_set` atomic with respect to every
/// other writer of the same counter, including writers in other processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn load_counter(&self, series: &str) -> Result<Option<SeriesCounter>, StoreError>;

    /// Every number currently recorded for `series`, in any format. Used to
    /// seed a counter that does not exist yet.
    async fn existing_numbers(&self, series: &str) -> Result<Vec<String>, StoreError>;

    /// Insert the counter at `seed` if absent. Returns `false` when another
    /// writer created it first.
    async fn create_counter(&self, spec: &SeriesSpec, seed: u64) -> Result<bool, StoreError>;

    async fn compare_and_set(
        &self,
        series: &str,
        expected: u64,
        next: u64,
        candidate: &str,
    ) -> Result<CasOutcome, StoreError>;

    /// Register a time-derived identifier for `series`. Returns `false` if it
    /// was registered before or a record already carries it.
    ///
    /// Must not depend on the counter row, so it keeps working when the
    /// counter is unreadable or corrupted.
    async fn claim_identifier(&self, series: &str, identifier: &str) -> Result<bool, StoreError>;

    async fn numbered_records(&self, series: &str) -> Result<Vec<NumberedRecord>, StoreError>;

    async fn assign_number(&self, aggregate_id: Uuid, number: &str) -> Result<(), StoreError>;
}
