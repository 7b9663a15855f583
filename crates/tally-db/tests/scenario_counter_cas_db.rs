//! Series counter behaviour against a live PostgreSQL instance.
//!
//! Requires TALLY_DATABASE_URL; every test skips when it is unset. Each test
//! uses its own randomly named series so runs never interfere.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use tally_db::{insert_aggregate, NewAggregate, PgStore};
use tally_schemas::{Money, SeriesSpec};
use tally_sequence::{AllocError, AllocatorPolicy, CounterStore, SequenceAllocator};
use uuid::Uuid;

fn unique_series(prefix: &str) -> SeriesSpec {
    let tag = Uuid::new_v4().simple().to_string();
    SeriesSpec::new(format!("test-{}", &tag[..12]), prefix, 5)
}

fn aggregate(series: &SeriesSpec, number: &str, offset_secs: i64) -> NewAggregate {
    NewAggregate {
        aggregate_id: Uuid::new_v4(),
        series_name: series.name.clone(),
        number: number.to_string(),
        total: Money::ZERO,
        created_at_utc: Utc::now() + Duration::seconds(offset_secs),
    }
}

async fn pool_or_skip() -> anyhow::Result<Option<sqlx::PgPool>> {
    if std::env::var(tally_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: TALLY_DATABASE_URL not set");
        return Ok(None);
    }
    Ok(Some(tally_db::testkit_db_pool().await?))
}

#[tokio::test]
async fn concurrent_allocations_are_unique_and_dense() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip().await? else {
        return Ok(());
    };
    let spec = unique_series("CAS-");
    let alloc = Arc::new(SequenceAllocator::new(
        Arc::new(PgStore::new(pool)),
        [spec.clone()],
        AllocatorPolicy::strict(50),
    ));

    let tasks = (0..40).map(|_| {
        let alloc = Arc::clone(&alloc);
        let name = spec.name.clone();
        tokio::spawn(async move {
            loop {
                match alloc.allocate(&name).await {
                    Err(e) if e.is_retryable() => continue,
                    other => return other,
                }
            }
        })
    });

    let mut seen = BTreeSet::new();
    for joined in join_all(tasks).await {
        let a = joined??;
        assert!(!a.degraded);
        assert!(seen.insert(a.sequence.unwrap_or_default()), "duplicate {}", a.identifier);
    }
    assert_eq!(seen, (1..=40).collect::<BTreeSet<u64>>());
    Ok(())
}

#[tokio::test]
async fn counter_seeds_from_legacy_numbers_and_skips_taken() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip().await? else {
        return Ok(());
    };
    let spec = unique_series("LEG-");

    insert_aggregate(&pool, &aggregate(&spec, "LEG-00007", 0)).await?;
    insert_aggregate(&pool, &aggregate(&spec, "LEG-T17390000001230042", 1)).await?;
    insert_aggregate(&pool, &aggregate(&spec, "OTHER-99999", 2)).await?;

    let alloc = SequenceAllocator::new(
        Arc::new(PgStore::new(pool.clone())),
        [spec.clone()],
        AllocatorPolicy::strict(10),
    );

    let first = alloc.allocate(&spec.name).await?;
    assert_eq!(first.identifier, "LEG-00008");

    // A record written outside the allocator already holds the next value.
    insert_aggregate(&pool, &aggregate(&spec, "LEG-00009", 3)).await?;
    let second = alloc.allocate(&spec.name).await?;
    assert_eq!(second.identifier, "LEG-00010");
    assert_eq!(second.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn repair_renumbers_all_but_earliest_duplicate() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip().await? else {
        return Ok(());
    };
    let spec = unique_series("DUP-");

    let keeper = aggregate(&spec, "DUP-00003", 0);
    let later = aggregate(&spec, "DUP-00003", 10);
    let latest = aggregate(&spec, "DUP-00003", 20);
    for rec in [&later, &keeper, &latest] {
        insert_aggregate(&pool, rec).await?;
    }

    let alloc = SequenceAllocator::new(
        Arc::new(PgStore::new(pool.clone())),
        [spec.clone()],
        AllocatorPolicy::default(),
    );

    let report = alloc.repair_duplicates(&spec.name).await?;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.duplicate_groups, 1);
    let new_numbers: Vec<_> = report.renumbered.iter().map(|r| r.new_number.as_str()).collect();
    assert_eq!(new_numbers, ["DUP-00004", "DUP-00005"]);
    assert_eq!(report.renumbered[0].aggregate_id, later.aggregate_id);

    let kept: String = sqlx::query_scalar("select number from aggregate_records where aggregate_id = $1")
        .bind(keeper.aggregate_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(kept, "DUP-00003");

    let again = alloc.repair_duplicates(&spec.name).await?;
    assert!(again.is_clean());
    Ok(())
}

#[tokio::test]
async fn unknown_series_is_rejected_without_touching_the_store() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip().await? else {
        return Ok(());
    };
    let alloc = SequenceAllocator::new(
        Arc::new(PgStore::new(pool)),
        [SeriesSpec::orders()],
        AllocatorPolicy::default(),
    );

    let err = alloc.allocate("no-such-series").await.unwrap_err();
    assert!(matches!(err, AllocError::SeriesNotConfigured(ref s) if s == "no-such-series"));
    Ok(())
}

#[tokio::test]
async fn degraded_identifier_claims_are_unique_per_series() -> anyhow::Result<()> {
    let Some(pool) = pool_or_skip().await? else {
        return Ok(());
    };
    let spec = unique_series("DEG-");
    let other = unique_series("DEG-");
    let store = PgStore::new(pool.clone());
    insert_aggregate(&pool, &aggregate(&spec, "DEG-T17390000001230000000001", 0)).await?;

    assert!(store.claim_identifier(&spec.name, "DEG-T17390000001230000000042").await?);
    assert!(!store.claim_identifier(&spec.name, "DEG-T17390000001230000000042").await?);
    assert!(store.claim_identifier(&other.name, "DEG-T17390000001230000000042").await?);
    // Already held by a record.
    assert!(!store.claim_identifier(&spec.name, "DEG-T17390000001230000000001").await?);
    Ok(())
}
