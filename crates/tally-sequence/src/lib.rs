//! tally-sequence
//!
//! Issues human-readable, strictly sequential identifiers (`SAFT-00001`,
//! `INV-00001`) for named series.
//!
//! - Correctness comes from the store's compare-and-set on the series
//!   counter, never from an in-process lock.
//! - Lost races are retried up to a fixed ceiling, then surfaced as
//!   [`AllocError::AllocationExhausted`] (retryable by the caller).
//! - Duplicate repair renumbers colliding records through the same
//!   allocation path.

mod allocator;
mod repair;
mod store;

pub use allocator::{AllocError, Allocation, AllocatorPolicy, SequenceAllocator};
pub use repair::{duplicate_groups, DuplicateGroup, RepairReport, Renumbering};
pub use store::{CasOutcome, CounterStore};
