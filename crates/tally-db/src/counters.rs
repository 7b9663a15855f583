use async_trait::async_trait;
use sqlx::Row;
use tally_schemas::{NumberedRecord, SeriesCounter, SeriesSpec, StoreError};
use tally_sequence::{CasOutcome, CounterStore};
use uuid::Uuid;

use crate::{store_error, to_i64, to_u64, PgStore};

#[async_trait]
impl CounterStore for PgStore {
    async fn load_counter(&self, series: &str) -> Result<Option<SeriesCounter>, StoreError> {
        let row = sqlx::query(
            r#"
            select series_name, prefix, pad_width, last_issued, updated_at_utc
            from series_counters
            where series_name = $1
            "#,
        )
        .bind(series)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(e, "load_counter"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let pad_width: i32 = row.try_get("pad_width").map_err(|e| store_error(e, "load_counter"))?;
        let last_issued: i64 = row.try_get("last_issued").map_err(|e| store_error(e, "load_counter"))?;

        Ok(Some(SeriesCounter {
            series_name: row.try_get("series_name").map_err(|e| store_error(e, "load_counter"))?,
            prefix: row.try_get("prefix").map_err(|e| store_error(e, "load_counter"))?,
            pad_width: usize::try_from(pad_width)
                .map_err(|_| StoreError::Corrupted(format!("pad_width is negative: {pad_width}")))?,
            last_issued: to_u64(last_issued, "last_issued")?,
            updated_at_utc: row.try_get("updated_at_utc").map_err(|e| store_error(e, "load_counter"))?,
        }))
    }

    async fn existing_numbers(&self, series: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>("select number from aggregate_records where series_name = $1")
            .bind(series)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "existing_numbers"))
    }

    async fn create_counter(&self, spec: &SeriesSpec, seed: u64) -> Result<bool, StoreError> {
        let pad_width = i32::try_from(spec.pad_width)
            .map_err(|_| StoreError::Rejected(format!("pad_width out of range: {}", spec.pad_width)))?;

        let res = sqlx::query(
            r#"
            insert into series_counters (series_name, prefix, pad_width, last_issued)
            values ($1, $2, $3, $4)
            on conflict (series_name) do nothing
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.prefix)
        .bind(pad_width)
        .bind(to_i64(seed, "seed")?)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(e, "create_counter"))?;

        Ok(res.rows_affected() == 1)
    }

    async fn compare_and_set(
        &self,
        series: &str,
        expected: u64,
        next: u64,
        candidate: &str,
    ) -> Result<CasOutcome, StoreError> {
        // One statement: the conditional bump and the probe for a legacy
        // record already holding the candidate.
        let row = sqlx::query(
            r#"
            with bumped as (
              update series_counters
                 set last_issued = $3,
                     updated_at_utc = now()
               where series_name = $1
                 and last_issued = $2
              returning series_name
            )
            select
              exists (select 1 from bumped) as committed,
              exists (
                select 1 from aggregate_records
                where series_name = $1 and number = $4
              ) as taken
            "#,
        )
        .bind(series)
        .bind(to_i64(expected, "expected")?)
        .bind(to_i64(next, "next")?)
        .bind(candidate)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(e, "compare_and_set"))?;

        let committed: bool = row.try_get("committed").map_err(|e| store_error(e, "compare_and_set"))?;
        let taken: bool = row.try_get("taken").map_err(|e| store_error(e, "compare_and_set"))?;

        Ok(match (committed, taken) {
            (false, _) => CasOutcome::Conflict,
            (true, false) => CasOutcome::Committed,
            (true, true) => CasOutcome::IdentifierTaken,
        })
    }

    async fn claim_identifier(&self, series: &str, identifier: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            insert into degraded_identifiers (series_name, number)
            select $1, $2
            where not exists (
              select 1 from aggregate_records
              where series_name = $1 and number = $2
            )
            on conflict (series_name, number) do nothing
            "#,
        )
        .bind(series)
        .bind(identifier)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(e, "claim_identifier"))?;

        Ok(res.rows_affected() == 1)
    }

    async fn numbered_records(&self, series: &str) -> Result<Vec<NumberedRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            select aggregate_id, number, created_at_utc
            from aggregate_records
            where series_name = $1
            order by created_at_utc, aggregate_id
            "#,
        )
        .bind(series)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(e, "numbered_records"))?;

        rows.into_iter()
            .map(|row| {
                Ok(NumberedRecord {
                    aggregate_id: row.try_get("aggregate_id")?,
                    number: row.try_get("number")?,
                    created_at_utc: row.try_get("created_at_utc")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| store_error(e, "numbered_records"))
    }

    async fn assign_number(&self, aggregate_id: Uuid, number: &str) -> Result<(), StoreError> {
        let res = sqlx::query("update aggregate_records set number = $2 where aggregate_id = $1")
            .bind(aggregate_id)
            .bind(number)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(e, "assign_number"))?;

        if res.rows_affected() != 1 {
            return Err(StoreError::Rejected(format!(
                "assign_number: aggregate {aggregate_id} not found"
            )));
        }
        Ok(())
    }
}
