//! Human-readable identifier formatting and parsing.
//!
//! A series identifier is `prefix + zero-padded decimal`, e.g. `SAFT-00001`
//! or `INV-00042`. The prefix carries its own separator. Padding is a
//! minimum width: `SAFT-100000` is valid once a 5-wide series passes 99999.
//!
//! Historical data may hold identifiers from other schemes or plain garbage.
//! [`parse_suffix`] returns `None` for those so they are excluded from
//! counter seeding instead of failing it.
//!
//! Degraded identifiers (issued when the counter is unreachable) use a
//! `T`-marked, time-derived suffix. They are unique but not dense, and they
//! deliberately do not parse as a sequence suffix.

use serde::{Deserialize, Serialize};

/// Marker separating the prefix from a time-derived suffix.
pub const DEGRADED_MARKER: char = 'T';

const DEGRADED_MILLIS_WIDTH: usize = 13;
const DEGRADED_SALT_WIDTH: usize = 8;

/// Salts are reduced modulo this so they fit `DEGRADED_SALT_WIDTH` digits.
pub const DEGRADED_SALT_SPACE: u64 = 100_000_000;

/// Static description of one numbering series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub name: String,
    pub prefix: String,
    pub pad_width: usize,
}

impl SeriesSpec {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, pad_width: usize) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            pad_width,
        }
    }

    /// `orders` -> `SAFT-00001`.
    pub fn orders() -> Self {
        Self::new("orders", "SAFT-", 5)
    }

    /// `invoices` -> `INV-00001`.
    pub fn invoices() -> Self {
        Self::new("invoices", "INV-", 5)
    }

    pub fn format(&self, n: u64) -> String {
        format_identifier(self, n)
    }

    pub fn parse(&self, text: &str) -> Option<u64> {
        parse_suffix(self, text)
    }
}

pub fn format_identifier(spec: &SeriesSpec, n: u64) -> String {
    format!("{}{:0width$}", spec.prefix, n, width = spec.pad_width)
}

/// Numeric suffix of `text` under `spec`, or `None` if `text` does not
/// belong to the series' dense numbering.
pub fn parse_suffix(spec: &SeriesSpec, text: &str) -> Option<u64> {
    let rest = text.strip_prefix(spec.prefix.as_str())?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Highest parseable suffix among `numbers`; foreign or corrupted values
/// are skipped.
pub fn max_suffix<'a, I>(spec: &SeriesSpec, numbers: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    numbers
        .into_iter()
        .filter_map(|n| parse_suffix(spec, n))
        .max()
}

/// Time-derived identifier used only on the degraded allocation path.
///
/// Two calls in the same millisecond differ only by `salt`, so uniqueness is
/// up to the caller; the allocator registers every one with the store.
pub fn format_degraded(spec: &SeriesSpec, unix_millis: u64, salt: u64) -> String {
    format!(
        "{}{}{:0mw$}{:0sw$}",
        spec.prefix,
        DEGRADED_MARKER,
        unix_millis,
        salt % DEGRADED_SALT_SPACE,
        mw = DEGRADED_MILLIS_WIDTH,
        sw = DEGRADED_SALT_WIDTH,
    )
}

pub fn is_degraded(spec: &SeriesSpec, text: &str) -> bool {
    let Some(rest) = text.strip_prefix(spec.prefix.as_str()) else {
        return false;
    };
    let Some(digits) = rest.strip_prefix(DEGRADED_MARKER) else {
        return false;
    };
    digits.len() >= DEGRADED_MILLIS_WIDTH + DEGRADED_SALT_WIDTH
        && digits.bytes().all(|b| b.is_ascii_digit())
}
