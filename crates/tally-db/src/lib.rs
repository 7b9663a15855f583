//! tally-db
//!
//! PostgreSQL persistence boundary. [`PgStore`] implements the allocator's
//! [`tally_sequence::CounterStore`] and the reconciler's
//! [`tally_reconcile::LedgerStore`] / [`tally_reconcile::CatalogLookup`].

mod counters;
mod ledger;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tally_schemas::{CatalogItem, Money, StoreError};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "TALLY_DATABASE_URL";

/// Connect to Postgres using TALLY_DATABASE_URL.
pub async fn connect_from_env(max_connections: u32) -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Pool for DB-backed tests: connects via TALLY_DATABASE_URL and migrates.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env(8).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_counters_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'series_counters'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_counters_table: exists,
    })
}

/// Store handle shared by the allocator and the reconciler.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, Clone)]
pub struct NewAggregate {
    pub aggregate_id: Uuid,
    pub series_name: String,
    pub number: String,
    pub total: Money,
    pub created_at_utc: DateTime<Utc>,
}

/// Persist a parent record without line items.
pub async fn insert_aggregate(pool: &PgPool, rec: &NewAggregate) -> Result<()> {
    sqlx::query(
        r#"
        insert into aggregate_records (aggregate_id, series_name, number, total_micros, created_at_utc)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(rec.aggregate_id)
    .bind(&rec.series_name)
    .bind(&rec.number)
    .bind(rec.total.raw())
    .bind(rec.created_at_utc)
    .execute(pool)
    .await
    .context("insert_aggregate failed")?;
    Ok(())
}

/// Delete a record; its line items go with it.
pub async fn delete_aggregate(pool: &PgPool, aggregate_id: Uuid) -> Result<bool> {
    let res = sqlx::query("delete from aggregate_records where aggregate_id = $1")
        .bind(aggregate_id)
        .execute(pool)
        .await
        .context("delete_aggregate failed")?;
    Ok(res.rows_affected() == 1)
}

pub async fn insert_catalog_item(pool: &PgPool, item: &CatalogItem) -> Result<()> {
    sqlx::query(
        r#"
        insert into catalog_items (catalog_item_id, name, unit_price_micros)
        values ($1, $2, $3)
        "#,
    )
    .bind(item.catalog_item_id)
    .bind(&item.name)
    .bind(item.unit_price.raw())
    .execute(pool)
    .await
    .context("insert_catalog_item failed")?;
    Ok(())
}

/// Returns false when no such item exists.
pub async fn set_catalog_item_active(pool: &PgPool, catalog_item_id: Uuid, active: bool) -> Result<bool> {
    let res = sqlx::query("update catalog_items set active = $2 where catalog_item_id = $1")
        .bind(catalog_item_id)
        .bind(active)
        .execute(pool)
        .await
        .context("set_catalog_item_active failed")?;
    Ok(res.rows_affected() == 1)
}

/// Classify a driver error for the persistence boundary.
pub(crate) fn store_error(err: sqlx::Error, what: &str) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(format!("{what}: {err}")),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupted(format!("{what}: {err}")),
        other => StoreError::Rejected(format!("{what}: {other}")),
    }
}

pub(crate) fn to_u64(v: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupted(format!("{what} is negative: {v}")))
}

pub(crate) fn to_i64(v: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Rejected(format!("{what} out of range: {v}")))
}
