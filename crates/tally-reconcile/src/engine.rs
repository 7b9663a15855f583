use tally_schemas::{AggregateRecord, CatalogItem, LineItem, Money};

use crate::{ReconcileError, ReconcilePlan, ReconcileStatus};

/// Largest number of distinct catalog items an exact decomposition may use.
pub const MAX_DISTINCT_ITEMS: usize = 3;

/// Upper bound on quantity trials across one synthesis search. Keeps the
/// search bounded for large totals and big catalogs; running out means the
/// approximate fallback.
pub const SEARCH_BUDGET: u64 = 250_000;

/// Check a settled record. Unsettled records are consistent only when there
/// is nothing to explain.
///
/// Line totals that overflow `Money` can never match and are reported as a
/// mismatch against the saturated sum.
pub fn verify(record: &AggregateRecord) -> ReconcileStatus {
    let Some(actual) = record.line_total() else {
        return ReconcileStatus::AmountMismatch {
            expected: record.total,
            actual: record
                .line_items
                .iter()
                .fold(Money::ZERO, |acc, li| acc.saturating_add(li.total_price)),
        };
    };
    if actual.within_tolerance(record.total) {
        ReconcileStatus::AlreadyConsistent
    } else {
        ReconcileStatus::AmountMismatch {
            expected: record.total,
            actual,
        }
    }
}

/// Decide what to do with `record` given the active catalog.
///
/// Deterministic: the same record and catalog (same order) always produce
/// the same plan. Catalog order is the canonical preference order.
pub fn plan(record: &AggregateRecord, catalog: &[CatalogItem]) -> Result<ReconcilePlan, ReconcileError> {
    if record.total.is_negative() {
        return Err(ReconcileError::InvalidTotal {
            aggregate_id: record.aggregate_id,
            total: record.total,
        });
    }

    // Existing detail is a deliberate choice; only verify it.
    if record.is_settled() || record.total == Money::ZERO {
        return Ok(ReconcilePlan::no_write(verify(record)));
    }

    let usable: Vec<&CatalogItem> = catalog.iter().filter(|c| c.unit_price.is_positive()).collect();
    if usable.is_empty() {
        return Ok(ReconcilePlan::no_write(ReconcileStatus::NoCatalogAvailable));
    }

    let prices: Vec<Money> = usable.iter().map(|c| c.unit_price).collect();
    if let Some(quantities) = find_exact(record.total, &prices) {
        let items = quantities
            .into_iter()
            .map(|(idx, qty)| line_item(record, usable[idx], qty))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ReconcilePlan {
            status: ReconcileStatus::RepairedExact,
            items,
        });
    }

    // Single rounded line using the first usable item.
    let first = usable[0];
    let qty = record
        .total
        .div_round(first.unit_price)
        .unwrap_or(1)
        .max(1);
    Ok(ReconcilePlan {
        status: ReconcileStatus::RepairedApproximate,
        items: vec![line_item(record, first, qty)?],
    })
}

fn line_item(record: &AggregateRecord, item: &CatalogItem, qty: i64) -> Result<LineItem, ReconcileError> {
    LineItem::priced(record.aggregate_id, item.catalog_item_id, qty, item.unit_price).ok_or(
        ReconcileError::InvalidTotal {
            aggregate_id: record.aggregate_id,
            total: record.total,
        },
    )
}

/// Search for `(index, quantity)` pairs whose priced sum equals `total`
/// within tolerance, using as few distinct items as possible.
///
/// Item subsets are tried by size (1, 2, ... [`MAX_DISTINCT_ITEMS`]) and,
/// within a size, in lexicographic index order. Within a subset the earlier
/// items take the largest quantity that still fits, backing off one unit at
/// a time; the last item absorbs the remainder by rounding.
pub fn find_exact(total: Money, prices: &[Money]) -> Option<Vec<(usize, i64)>> {
    if !total.is_positive() || prices.iter().any(|p| !p.is_positive()) {
        return None;
    }

    let mut budget = SEARCH_BUDGET;
    for k in 1..=MAX_DISTINCT_ITEMS.min(prices.len()) {
        let mut combo: Vec<usize> = (0..k).collect();
        loop {
            let mut qtys = Vec::with_capacity(k);
            if fill(total, &combo, prices, &mut qtys, &mut budget) {
                return Some(combo.iter().copied().zip(qtys).collect());
            }
            if budget == 0 {
                return None;
            }
            if !next_combination(&mut combo, prices.len()) {
                break;
            }
        }
    }
    None
}

/// Assign quantities to `combo[qtys.len()..]` so the remainder reaches zero.
fn fill(
    remaining: Money,
    combo: &[usize],
    prices: &[Money],
    qtys: &mut Vec<i64>,
    budget: &mut u64,
) -> bool {
    let pos = qtys.len();
    let price = prices[combo[pos]];

    if pos + 1 == combo.len() {
        *budget = budget.saturating_sub(1);
        let Some(q) = remaining.div_round(price) else {
            return false;
        };
        if q < 1 {
            return false;
        }
        return match price.checked_mul_qty(q) {
            Some(line) if line.within_tolerance(remaining) => {
                qtys.push(q);
                true
            }
            _ => false,
        };
    }

    // Leave at least one unit of each later item. A reservation that
    // overflows cannot fit under any total.
    let Some(reserved) = combo[pos + 1..]
        .iter()
        .try_fold(Money::ZERO, |acc, &i| acc.checked_add(prices[i]))
    else {
        return false;
    };
    let room = remaining - reserved;
    if !room.is_positive() {
        return false;
    }
    let max_q = room.raw() / price.raw();

    let mut q = max_q;
    while q >= 1 {
        if *budget == 0 {
            return false;
        }
        *budget -= 1;

        let Some(line) = price.checked_mul_qty(q) else {
            q -= 1;
            continue;
        };
        qtys.push(q);
        if fill(remaining - line, combo, prices, qtys, budget) {
            return true;
        }
        qtys.pop();
        q -= 1;
    }
    false
}

/// Advance `combo` to the next k-combination of `0..n` in lexicographic
/// order. Returns `false` after the last one.
fn next_combination(combo: &mut [usize], n: usize) -> bool {
    let k = combo.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if combo[i] < n - k + i {
            combo[i] += 1;
            for j in i + 1..k {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
    }
    false
}
