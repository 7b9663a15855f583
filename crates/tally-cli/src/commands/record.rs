//! `tally record` and `tally catalog` handlers.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tally_db::NewAggregate;
use tally_schemas::{CatalogItem, Money};
use tracing::info;
use uuid::Uuid;

use super::{allocator_for, connect, load_numbering, parse_uuid, reconcile::print_result, reconciler};

fn parse_money(raw: &str, what: &str) -> Result<Money> {
    raw.parse::<Money>()
        .with_context(|| format!("invalid {what}: {raw}"))
}

/// Allocate, persist, then reconcile. A failed reconcile leaves a valid
/// record behind; `tally reconcile all` picks it up later.
pub async fn create(series: &str, total: &str, config_paths: &[String]) -> Result<()> {
    let total = parse_money(total, "total")?;
    if total.is_negative() {
        bail!("total must not be negative: {total}");
    }

    let cfg = load_numbering(config_paths)?;
    let alloc = allocator_for(series, &cfg).await?;
    let allocation = alloc.allocate(series).await?;

    let store = alloc.store();
    let rec = NewAggregate {
        aggregate_id: Uuid::new_v4(),
        series_name: allocation.series.clone(),
        number: allocation.identifier.clone(),
        total,
        created_at_utc: Utc::now(),
    };
    tally_db::insert_aggregate(store.pool(), &rec).await?;
    info!(aggregate_id = %rec.aggregate_id, number = %rec.number, degraded = allocation.degraded, "record created");

    println!("aggregate_id={}", rec.aggregate_id);
    println!("number={}", rec.number);
    println!("degraded={}", allocation.degraded);

    match reconciler(store).reconcile(rec.aggregate_id).await {
        Ok(result) => print_result(&result),
        Err(e) => eprintln!("WARN: RECONCILE_DEFERRED aggregate_id={} error={}", rec.aggregate_id, e),
    }
    Ok(())
}

pub async fn catalog_add(name: &str, price: &str) -> Result<()> {
    let unit_price = parse_money(price, "price")?;
    if !unit_price.is_positive() {
        bail!("price must be positive: {unit_price}");
    }

    let store = connect(2).await?;
    let item = CatalogItem::new(name.trim(), unit_price);
    tally_db::insert_catalog_item(store.pool(), &item).await?;

    println!("catalog_item_id={}", item.catalog_item_id);
    println!("name={}", item.name);
    println!("unit_price={}", item.unit_price);
    Ok(())
}

pub async fn catalog_deactivate(catalog_item_id: &str) -> Result<()> {
    let id = parse_uuid(catalog_item_id, "catalog_item_id")?;
    let store = connect(2).await?;

    if !tally_db::set_catalog_item_active(store.pool(), id, false).await? {
        bail!("catalog item not found: {id}");
    }
    println!("catalog_item_id={} active=false", id);
    Ok(())
}
