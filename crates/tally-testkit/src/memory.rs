use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tally_reconcile::{BatchOutcome, CatalogLookup, LedgerStore};
use tally_schemas::{
    AggregateRecord, CatalogItem, LineItem, NumberedRecord, SeriesCounter, SeriesSpec, StoreError,
};
use tally_sequence::{CasOutcome, CounterStore};
use uuid::Uuid;

#[derive(Default)]
struct State {
    counters: BTreeMap<String, SeriesCounter>,
    aggregates: BTreeMap<Uuid, AggregateRecord>,
    /// (item, active) in insertion order.
    catalog: Vec<(CatalogItem, bool)>,
    /// (series, identifier) pairs registered by the degraded path.
    claimed: BTreeSet<(String, String)>,
}

/// Shared-state fake with the same atomicity the Postgres store provides:
/// counter CAS and line-item batches are each applied under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    counter_fault: Mutex<Option<StoreError>>,
    claim_fault: Mutex<Option<StoreError>>,
    catalog_fault: Mutex<Option<StoreError>>,
    fetch_fault: Mutex<Option<(Uuid, StoreError)>>,
    rejected_claims: AtomicUsize,
    interleave: AtomicBool,
    cas_calls: AtomicUsize,
    batch_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Yield to the runtime before every counter CAS and every batch insert,
    /// so concurrent callers all read before any of them writes.
    pub fn interleaved() -> Self {
        let store = Self::default();
        store.interleave.store(true, Ordering::SeqCst);
        store
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every counter operation fails with `fault` until cleared with `None`.
    /// Identifier claims are not counter operations and keep working.
    pub fn fail_counters(&self, fault: Option<StoreError>) {
        *self.counter_fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Every identifier claim fails with `fault` until cleared with `None`.
    pub fn fail_claims(&self, fault: Option<StoreError>) {
        *self.claim_fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// The next `n` identifier claims report the identifier as already taken.
    pub fn reject_next_claims(&self, n: usize) {
        self.rejected_claims.store(n, Ordering::SeqCst);
    }

    /// Catalog lookups fail with `fault` until cleared with `None`.
    pub fn fail_catalog(&self, fault: Option<StoreError>) {
        *self.catalog_fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Fetching `aggregate_id` fails with `fault` until cleared with `None`.
    pub fn fail_fetch(&self, fault: Option<(Uuid, StoreError)>) {
        *self.fetch_fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    fn check_counter_fault(&self) -> Result<(), StoreError> {
        check_fault(&self.counter_fault)
    }

    async fn maybe_yield(&self) {
        if self.interleave.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    pub fn insert_aggregate(&self, record: AggregateRecord) {
        self.state().aggregates.insert(record.aggregate_id, record);
    }

    pub fn remove_aggregate(&self, aggregate_id: Uuid) -> bool {
        self.state().aggregates.remove(&aggregate_id).is_some()
    }

    pub fn aggregate(&self, aggregate_id: Uuid) -> Option<AggregateRecord> {
        self.state().aggregates.get(&aggregate_id).cloned()
    }

    pub fn add_catalog_item(&self, item: CatalogItem) {
        self.state().catalog.push((item, true));
    }

    pub fn set_catalog_item_active(&self, catalog_item_id: Uuid, active: bool) {
        for (item, flag) in self.state().catalog.iter_mut() {
            if item.catalog_item_id == catalog_item_id {
                *flag = active;
            }
        }
    }

    pub fn counter(&self, series: &str) -> Option<SeriesCounter> {
        self.state().counters.get(series).cloned()
    }

    /// Overwrite a counter as-is, bypassing the allocator.
    pub fn put_counter(&self, counter: SeriesCounter) {
        self.state()
            .counters
            .insert(counter.series_name.clone(), counter);
    }

    /// Identifiers registered for `series` by the degraded path.
    pub fn claimed(&self, series: &str) -> Vec<String> {
        self.state()
            .claimed
            .iter()
            .filter(|(s, _)| s == series)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn cas_calls(&self) -> usize {
        self.cas_calls.load(Ordering::SeqCst)
    }

    /// Batches that actually committed.
    pub fn batch_inserts(&self) -> usize {
        self.batch_inserts.load(Ordering::SeqCst)
    }
}

fn check_fault(slot: &Mutex<Option<StoreError>>) -> Result<(), StoreError> {
    match &*slot.lock().unwrap_or_else(PoisonError::into_inner) {
        Some(fault) => Err(fault.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn load_counter(&self, series: &str) -> Result<Option<SeriesCounter>, StoreError> {
        self.check_counter_fault()?;
        Ok(self.counter(series))
    }

    async fn existing_numbers(&self, series: &str) -> Result<Vec<String>, StoreError> {
        self.check_counter_fault()?;
        Ok(self
            .state()
            .aggregates
            .values()
            .filter(|r| r.series_name == series)
            .map(|r| r.number.clone())
            .collect())
    }

    async fn create_counter(&self, spec: &SeriesSpec, seed: u64) -> Result<bool, StoreError> {
        self.check_counter_fault()?;
        let mut state = self.state();
        if state.counters.contains_key(&spec.name) {
            return Ok(false);
        }
        state.counters.insert(
            spec.name.clone(),
            SeriesCounter {
                series_name: spec.name.clone(),
                prefix: spec.prefix.clone(),
                pad_width: spec.pad_width,
                last_issued: seed,
                updated_at_utc: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        series: &str,
        expected: u64,
        next: u64,
        candidate: &str,
    ) -> Result<CasOutcome, StoreError> {
        self.maybe_yield().await;
        self.check_counter_fault()?;
        self.cas_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let Some(counter) = state.counters.get_mut(series) else {
            return Ok(CasOutcome::Conflict);
        };
        if counter.last_issued != expected {
            return Ok(CasOutcome::Conflict);
        }
        counter.last_issued = next;
        counter.updated_at_utc = Utc::now();

        let taken = state
            .aggregates
            .values()
            .any(|r| r.series_name == series && r.number == candidate);
        Ok(if taken {
            CasOutcome::IdentifierTaken
        } else {
            CasOutcome::Committed
        })
    }

    async fn claim_identifier(&self, series: &str, identifier: &str) -> Result<bool, StoreError> {
        self.maybe_yield().await;
        check_fault(&self.claim_fault)?;
        let forced = self
            .rejected_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Ok(false);
        }

        let mut state = self.state();
        let held = state
            .aggregates
            .values()
            .any(|r| r.series_name == series && r.number == identifier);
        if held {
            return Ok(false);
        }
        Ok(state
            .claimed
            .insert((series.to_string(), identifier.to_string())))
    }

    async fn numbered_records(&self, series: &str) -> Result<Vec<NumberedRecord>, StoreError> {
        self.check_counter_fault()?;
        let mut out: Vec<NumberedRecord> = self
            .state()
            .aggregates
            .values()
            .filter(|r| r.series_name == series)
            .map(|r| NumberedRecord {
                aggregate_id: r.aggregate_id,
                number: r.number.clone(),
                created_at_utc: r.created_at_utc,
            })
            .collect();
        out.sort_by(|a, b| {
            a.created_at_utc
                .cmp(&b.created_at_utc)
                .then_with(|| a.aggregate_id.cmp(&b.aggregate_id))
        });
        Ok(out)
    }

    async fn assign_number(&self, aggregate_id: Uuid, number: &str) -> Result<(), StoreError> {
        self.check_counter_fault()?;
        match self.state().aggregates.get_mut(&aggregate_id) {
            Some(record) => {
                record.number = number.to_string();
                Ok(())
            }
            None => Err(StoreError::Rejected(format!(
                "assign_number: aggregate {aggregate_id} not found"
            ))),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn fetch_aggregate(&self, aggregate_id: Uuid) -> Result<Option<AggregateRecord>, StoreError> {
        if let Some((id, fault)) = &*self.fetch_fault.lock().unwrap_or_else(PoisonError::into_inner) {
            if *id == aggregate_id {
                return Err(fault.clone());
            }
        }
        Ok(self.aggregate(aggregate_id))
    }

    async fn list_aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state();
        let mut ids: Vec<_> = state
            .aggregates
            .values()
            .map(|r| (r.created_at_utc, r.aggregate_id))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn insert_line_items_if_empty(
        &self,
        aggregate_id: Uuid,
        items: &[LineItem],
    ) -> Result<BatchOutcome, StoreError> {
        self.maybe_yield().await;

        let mut state = self.state();
        let Some(record) = state.aggregates.get_mut(&aggregate_id) else {
            return Err(StoreError::Rejected(format!(
                "insert_line_items: aggregate {aggregate_id} not found"
            )));
        };
        if record.is_settled() {
            return Ok(BatchOutcome::AlreadyPopulated);
        }
        // Same row checks as the database; any failure rejects the whole batch.
        if let Some(bad) = items
            .iter()
            .find(|li| li.aggregate_id != aggregate_id || !li.is_internally_consistent())
        {
            return Err(StoreError::Rejected(format!(
                "insert_line_items: invalid item {bad:?}"
            )));
        }

        record.line_items.extend_from_slice(items);
        self.batch_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(BatchOutcome::Inserted)
    }
}

#[async_trait]
impl CatalogLookup for MemoryStore {
    async fn active_catalog(&self) -> Result<Vec<CatalogItem>, StoreError> {
        check_fault(&self.catalog_fault)?;
        Ok(self
            .state()
            .catalog
            .iter()
            .filter(|(_, active)| *active)
            .map(|(item, _)| item.clone())
            .collect())
    }
}
