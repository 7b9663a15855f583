use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

/// Persisted counter for one series. `last_issued` only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesCounter {
    pub series_name: String,
    pub prefix: String,
    pub pad_width: usize,
    pub last_issued: u64,
    pub updated_at_utc: DateTime<Utc>,
}

/// An order or invoice: a numbered parent whose total must be explained by
/// its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub aggregate_id: Uuid,
    pub series_name: String,
    pub number: String,
    pub total: Money,
    pub created_at_utc: DateTime<Utc>,
    pub line_items: Vec<LineItem>,
}

impl AggregateRecord {
    /// A record is settled once it carries at least one line item.
    pub fn is_settled(&self) -> bool {
        !self.line_items.is_empty()
    }

    /// Sum of line totals, or `None` if it does not fit in `Money`.
    pub fn line_total(&self) -> Option<Money> {
        self.line_items
            .iter()
            .try_fold(Money::ZERO, |acc, li| acc.checked_add(li.total_price))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub aggregate_id: Uuid,
    pub catalog_item_id: Uuid,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
}

impl LineItem {
    /// Build a line item with `total_price = quantity * unit_price`.
    ///
    /// Returns `None` for a non-positive quantity or an overflowing total.
    pub fn priced(
        aggregate_id: Uuid,
        catalog_item_id: Uuid,
        quantity: i64,
        unit_price: Money,
    ) -> Option<Self> {
        if quantity <= 0 {
            return None;
        }
        let total_price = unit_price.checked_mul_qty(quantity)?;
        Some(Self {
            aggregate_id,
            catalog_item_id,
            quantity,
            unit_price,
            total_price,
        })
    }

    /// Stored `total_price` still equals `quantity * unit_price`.
    pub fn is_internally_consistent(&self) -> bool {
        self.quantity > 0 && self.unit_price.checked_mul_qty(self.quantity) == Some(self.total_price)
    }
}

/// Read-only view of an active product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub catalog_item_id: Uuid,
    pub name: String,
    pub unit_price: Money,
}

impl CatalogItem {
    pub fn new(name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            catalog_item_id: Uuid::new_v4(),
            name: name.into(),
            unit_price,
        }
    }
}

/// Minimal projection used by duplicate scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberedRecord {
    pub aggregate_id: Uuid,
    pub number: String,
    pub created_at_utc: DateTime<Utc>,
}
