//! tally-reconcile
//!
//! Line-item reconciliation for orders and invoices.
//!
//! - Records with line items are verified against their total (±0.01);
//!   mismatches are reported, never corrected.
//! - Records without line items get a deterministic, minimal set synthesized
//!   from the catalog, written as one atomic batch.
//!
//! [`engine`] is pure (no I/O). [`Reconciler`] drives it against the
//! [`LedgerStore`] and [`CatalogLookup`] ports.

pub mod engine;
mod service;
mod types;

pub use engine::{find_exact, plan, verify, MAX_DISTINCT_ITEMS, SEARCH_BUDGET};
pub use service::{CatalogLookup, LedgerStore, Reconciler};
pub use types::*;
