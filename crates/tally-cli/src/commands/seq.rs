//! `tally seq` handlers.

use anyhow::Result;

use super::{allocator_for, load_numbering};

pub async fn allocate(series: &str, config_paths: &[String]) -> Result<()> {
    let cfg = load_numbering(config_paths)?;
    let alloc = allocator_for(series, &cfg).await?;

    let a = alloc.allocate(series).await?;
    println!("series={}", a.series);
    println!("identifier={}", a.identifier);
    match a.sequence {
        Some(n) => println!("sequence={n}"),
        None => println!("sequence=none"),
    }
    println!("attempts={}", a.attempts);
    println!("degraded={}", a.degraded);
    Ok(())
}

pub async fn repair(series: &str, config_paths: &[String]) -> Result<()> {
    let cfg = load_numbering(config_paths)?;
    let alloc = allocator_for(series, &cfg).await?;

    let report = alloc.repair_duplicates(series).await?;
    println!("series={}", report.series);
    println!("scanned={}", report.scanned);
    println!("duplicate_groups={}", report.duplicate_groups);
    println!("renumbered={}", report.renumbered.len());
    for r in &report.renumbered {
        println!(
            "renumber aggregate_id={} old_number={} new_number={}",
            r.aggregate_id, r.old_number, r.new_number
        );
    }
    Ok(())
}
