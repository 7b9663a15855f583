//! In-memory fakes and fixtures for scenario tests.
//!
//! [`MemoryStore`] implements every persistence port the allocator and the
//! reconciler need, with switches for injecting store failures and for
//! forcing interleavings between concurrent callers.

mod memory;

pub use memory::MemoryStore;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tally_schemas::{AggregateRecord, CatalogItem, LineItem, Money};
use uuid::Uuid;

/// Fixed base instant so creation-order assertions are stable.
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_739_000_000, 0)
        .single()
        .unwrap_or_default()
}

/// Unsettled record created `offset_secs` after [`base_time`].
pub fn aggregate(series: &str, number: &str, total: &str, offset_secs: i64) -> Result<AggregateRecord> {
    Ok(AggregateRecord {
        aggregate_id: Uuid::new_v4(),
        series_name: series.to_string(),
        number: number.to_string(),
        total: total.parse().with_context(|| format!("parse total: {total}"))?,
        created_at_utc: base_time() + Duration::seconds(offset_secs),
        line_items: Vec::new(),
    })
}

pub fn catalog_item(name: &str, price: &str) -> Result<CatalogItem> {
    let unit_price: Money = price.parse().with_context(|| format!("parse price: {price}"))?;
    Ok(CatalogItem::new(name, unit_price))
}

/// Attach a priced line item to `record` without touching its total.
pub fn with_line_item(mut record: AggregateRecord, item: &CatalogItem, quantity: i64) -> Result<AggregateRecord> {
    let li = LineItem::priced(record.aggregate_id, item.catalog_item_id, quantity, item.unit_price)
        .context("line item total overflows")?;
    record.line_items.push(li);
    Ok(record)
}
