//! Command handler modules for the `tally` binary.
//!
//! Shared config/connection wiring lives here; command-specific logic lives
//! in the submodules.

pub mod reconcile;
pub mod record;
pub mod seq;

use std::sync::Arc;

use anyhow::{Context, Result};
use tally_config::{report_unused_keys, NumberingConfig, UnusedKeyPolicy};
use tally_db::PgStore;
use tally_reconcile::Reconciler;
use tally_sequence::{AllocatorPolicy, SequenceAllocator};
use uuid::Uuid;

/// Load layered config (built-in defaults when no path is given) and print
/// its hash so every run records what it executed with.
pub fn load_numbering(config_paths: &[String]) -> Result<NumberingConfig> {
    let loaded = if config_paths.is_empty() {
        tally_config::load_defaults()?
    } else {
        let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
        tally_config::load_layered_yaml(&path_refs)?
    };

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        eprintln!(
            "WARN: CONFIG_UNUSED_KEYS unused_leaf_keys={}",
            report.unused_leaf_pointers.len()
        );
        for p in report.unused_leaf_pointers.iter().take(50) {
            eprintln!("  unused={}", p);
        }
    }

    println!("config_hash={}", loaded.config_hash);
    loaded.numbering()
}

pub async fn connect(max_connections: u32) -> Result<Arc<PgStore>> {
    let pool = tally_db::connect_from_env(max_connections).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Allocator over the configured series; fails fast on an unknown series
/// before any connection is attempted.
pub async fn allocator_for(series: &str, cfg: &NumberingConfig) -> Result<SequenceAllocator<PgStore>> {
    if cfg.series(series).is_none() {
        anyhow::bail!("series not configured: {series}");
    }
    let store = connect(cfg.database.max_connections).await?;
    let policy = AllocatorPolicy {
        max_attempts: cfg.allocator.max_attempts,
        degraded_fallback: cfg.allocator.degraded_fallback,
    };
    Ok(SequenceAllocator::new(store, cfg.series.iter().cloned(), policy))
}

pub fn reconciler(store: &Arc<PgStore>) -> Reconciler<PgStore, PgStore> {
    Reconciler::new(Arc::clone(store), Arc::clone(store))
}

pub fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid {what} uuid: {raw}"))
}
