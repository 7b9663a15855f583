//! tally-schemas
//!
//! Shared vocabulary for the numbering and reconciliation crates:
//! fixed-point [`Money`], series identifier formatting/parsing, persisted
//! record shapes, and the persistence-boundary error type.

pub mod error;
pub mod ident;
pub mod money;
pub mod records;

pub use error::StoreError;
pub use ident::{
    format_degraded, format_identifier, is_degraded, max_suffix, parse_suffix, SeriesSpec,
    DEGRADED_MARKER, DEGRADED_SALT_SPACE,
};
pub use money::{Money, MoneyParseError, MICROS_SCALE};
pub use records::{AggregateRecord, CatalogItem, LineItem, NumberedRecord, SeriesCounter};
