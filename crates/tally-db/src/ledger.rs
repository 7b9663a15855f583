use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tally_reconcile::{BatchOutcome, CatalogLookup, LedgerStore};
use tally_schemas::{AggregateRecord, CatalogItem, LineItem, Money, StoreError};
use tracing::debug;
use uuid::Uuid;

use crate::{store_error, PgStore};

fn line_item_from_row(row: &PgRow) -> Result<LineItem, sqlx::Error> {
    Ok(LineItem {
        aggregate_id: row.try_get("aggregate_id")?,
        catalog_item_id: row.try_get("catalog_item_id")?,
        quantity: row.try_get("quantity")?,
        unit_price: Money::new(row.try_get("unit_price_micros")?),
        total_price: Money::new(row.try_get("total_price_micros")?),
    })
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn fetch_aggregate(&self, aggregate_id: Uuid) -> Result<Option<AggregateRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            select aggregate_id, series_name, number, total_micros, created_at_utc
            from aggregate_records
            where aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(e, "fetch_aggregate"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query(
            r#"
            select aggregate_id, catalog_item_id, quantity, unit_price_micros, total_price_micros
            from line_items
            where aggregate_id = $1
            order by position
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(e, "fetch_line_items"))?;

        let line_items = items
            .iter()
            .map(line_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| store_error(e, "fetch_line_items"))?;

        let decode = |e| store_error(e, "fetch_aggregate");
        Ok(Some(AggregateRecord {
            aggregate_id: row.try_get("aggregate_id").map_err(decode)?,
            series_name: row.try_get("series_name").map_err(decode)?,
            number: row.try_get("number").map_err(decode)?,
            total: Money::new(row.try_get("total_micros").map_err(decode)?),
            created_at_utc: row.try_get("created_at_utc").map_err(decode)?,
            line_items,
        }))
    }

    async fn list_aggregate_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            "select aggregate_id from aggregate_records order by created_at_utc, aggregate_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(e, "list_aggregate_ids"))
    }

    async fn insert_line_items_if_empty(
        &self,
        aggregate_id: Uuid,
        items: &[LineItem],
    ) -> Result<BatchOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error(e, "insert_line_items: begin"))?;

        // Row lock serializes concurrent reconcilers of the same aggregate.
        let locked = sqlx::query("select 1 from aggregate_records where aggregate_id = $1 for update")
            .bind(aggregate_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error(e, "insert_line_items: lock"))?;
        if locked.is_none() {
            return Err(StoreError::Rejected(format!(
                "insert_line_items: aggregate {aggregate_id} not found"
            )));
        }

        let (populated,): (bool,) =
            sqlx::query_as("select exists (select 1 from line_items where aggregate_id = $1)")
                .bind(aggregate_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| store_error(e, "insert_line_items: probe"))?;
        if populated {
            debug!(aggregate_id = %aggregate_id, "line items already present; batch skipped");
            return Ok(BatchOutcome::AlreadyPopulated);
        }

        for (position, item) in items.iter().enumerate() {
            if item.aggregate_id != aggregate_id {
                return Err(StoreError::Rejected(format!(
                    "insert_line_items: item belongs to {}, not {aggregate_id}",
                    item.aggregate_id
                )));
            }
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Rejected("insert_line_items: batch too large".to_string()))?;

            sqlx::query(
                r#"
                insert into line_items (
                  aggregate_id, position, catalog_item_id, quantity, unit_price_micros, total_price_micros
                ) values (
                  $1, $2, $3, $4, $5, $6
                )
                "#,
            )
            .bind(aggregate_id)
            .bind(position)
            .bind(item.catalog_item_id)
            .bind(item.quantity)
            .bind(item.unit_price.raw())
            .bind(item.total_price.raw())
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error(e, "insert_line_items: insert"))?;
        }

        // Dropping `tx` on any early return above rolls the batch back.
        tx.commit()
            .await
            .map_err(|e| store_error(e, "insert_line_items: commit"))?;
        Ok(BatchOutcome::Inserted)
    }
}

#[async_trait]
impl CatalogLookup for PgStore {
    async fn active_catalog(&self) -> Result<Vec<CatalogItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            select catalog_item_id, name, unit_price_micros
            from catalog_items
            where active
            order by seq
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(e, "active_catalog"))?;

        rows.iter()
            .map(|row| {
                Ok(CatalogItem {
                    catalog_item_id: row.try_get("catalog_item_id")?,
                    name: row.try_get("name")?,
                    unit_price: Money::new(row.try_get("unit_price_micros")?),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| store_error(e, "active_catalog"))
    }
}
