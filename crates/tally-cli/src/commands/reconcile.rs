//! `tally reconcile` handlers.

use anyhow::Result;
use tally_reconcile::{ReconcileStatus, ReconciliationResult};

use super::{connect, parse_uuid, reconciler};

pub async fn one(aggregate_id: &str) -> Result<()> {
    let id = parse_uuid(aggregate_id, "aggregate_id")?;
    let store = connect(2).await?;

    let result = reconciler(&store).reconcile(id).await?;
    print_result(&result);
    Ok(())
}

pub async fn all() -> Result<()> {
    let store = connect(2).await?;

    let results = reconciler(&store).reconcile_all().await?;
    for r in &results {
        print_result(r);
    }

    let repaired = results.iter().filter(|r| !r.written.is_empty()).count();
    let attention = results.iter().filter(|r| r.status.needs_attention()).count();
    println!("scanned={} repaired={} attention={}", results.len(), repaired, attention);
    Ok(())
}

pub(crate) fn print_result(r: &ReconciliationResult) {
    let mut line = format!(
        "aggregate_id={} number={} status={} written={} residual={}",
        r.aggregate_id,
        r.number,
        r.status.as_str(),
        r.written.len(),
        r.residual
    );
    if let ReconcileStatus::AmountMismatch { expected, actual } = &r.status {
        line.push_str(&format!(" expected={expected} actual={actual}"));
    }
    println!("{line}");
}
