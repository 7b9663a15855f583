//! Duplicate detection and repair for a series.
//!
//! Records sharing one literal number form a duplicate group. The earliest
//! record (creation time, then id) keeps the number; every later record gets
//! a fresh identifier from the strict allocation path. A second run finds no
//! groups and changes nothing.

use std::collections::BTreeMap;

use serde::Serialize;
use tally_schemas::NumberedRecord;
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocator::{AllocError, SequenceAllocator};
use crate::store::CounterStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub number: String,
    pub keeper: NumberedRecord,
    pub renumber: Vec<NumberedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Renumbering {
    pub aggregate_id: Uuid,
    pub old_number: String,
    pub new_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub series: String,
    pub scanned: usize,
    pub duplicate_groups: usize,
    pub renumbered: Vec<Renumbering>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_groups == 0 && self.renumbered.is_empty()
    }
}

/// Group `records` by literal number and keep only groups with collisions.
///
/// Output is ordered by number; within a group the keeper is the earliest
/// record and `renumber` follows creation order.
pub fn duplicate_groups(records: &[NumberedRecord]) -> Vec<DuplicateGroup> {
    let mut by_number: BTreeMap<&str, Vec<&NumberedRecord>> = BTreeMap::new();
    for r in records {
        by_number.entry(r.number.as_str()).or_default().push(r);
    }

    by_number
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(number, mut members)| {
            members.sort_by(|a, b| {
                a.created_at_utc
                    .cmp(&b.created_at_utc)
                    .then_with(|| a.aggregate_id.cmp(&b.aggregate_id))
            });
            let keeper = members[0].clone();
            let renumber = members[1..].iter().map(|r| (*r).clone()).collect();
            DuplicateGroup {
                number: number.to_string(),
                keeper,
                renumber,
            }
        })
        .collect()
}

impl<S: CounterStore + ?Sized> SequenceAllocator<S> {
    /// Scan `series` for colliding numbers and renumber all but the earliest
    /// record of each collision.
    pub async fn repair_duplicates(&self, series: &str) -> Result<RepairReport, AllocError> {
        let spec = self.spec(series)?.clone();
        let records = self.store().numbered_records(&spec.name).await?;
        let groups = duplicate_groups(&records);

        if !groups.is_empty() {
            warn!(series = %spec.name, groups = groups.len(), "duplicate numbers detected");
        }

        let mut renumbered = Vec::new();
        for group in &groups {
            for record in &group.renumber {
                let allocation = self.allocate_strict(&spec).await?;
                self.store()
                    .assign_number(record.aggregate_id, &allocation.identifier)
                    .await?;

                info!(
                    series = %spec.name,
                    aggregate_id = %record.aggregate_id,
                    old_number = %group.number,
                    new_number = %allocation.identifier,
                    "record renumbered"
                );
                renumbered.push(Renumbering {
                    aggregate_id: record.aggregate_id,
                    old_number: group.number.clone(),
                    new_number: allocation.identifier,
                });
            }
        }

        Ok(RepairReport {
            series: spec.name,
            scanned: records.len(),
            duplicate_groups: groups.len(),
            renumbered,
        })
    }
}
