use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tally_schemas::SeriesSpec;

const MAX_PAD_WIDTH: usize = 18;

/// Typed view over `/series`, `/allocator` and `/database`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingConfig {
    /// Ordered by series name.
    pub series: Vec<SeriesSpec>,
    pub allocator: AllocatorSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocatorSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_true")]
    pub degraded_fallback: bool,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            degraded_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSeries {
    prefix: String,
    pad_width: usize,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            series: vec![SeriesSpec::invoices(), SeriesSpec::orders()],
            allocator: AllocatorSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl NumberingConfig {
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let mut cfg = NumberingConfig::default();

        if let Some(series) = config_json.pointer("/series") {
            let raw: BTreeMap<String, RawSeries> =
                serde_json::from_value(series.clone()).context("invalid /series section")?;
            if !raw.is_empty() {
                cfg.series = raw
                    .into_iter()
                    .map(|(name, s)| validate_series(name, s))
                    .collect::<Result<Vec<_>>>()?;
            }
        }

        if let Some(alloc) = config_json.pointer("/allocator") {
            cfg.allocator =
                serde_json::from_value(alloc.clone()).context("invalid /allocator section")?;
            if cfg.allocator.max_attempts == 0 {
                bail!("/allocator/max_attempts must be >= 1");
            }
        }

        if let Some(db) = config_json.pointer("/database") {
            cfg.database = serde_json::from_value(db.clone()).context("invalid /database section")?;
        }

        Ok(cfg)
    }

    pub fn series(&self, name: &str) -> Option<&SeriesSpec> {
        self.series.iter().find(|s| s.name == name)
    }
}

fn validate_series(name: String, raw: RawSeries) -> Result<SeriesSpec> {
    if name.trim().is_empty() {
        bail!("series name must not be empty");
    }
    if raw.prefix.is_empty() {
        bail!("series {name}: prefix must not be empty");
    }
    if raw.prefix.ends_with(|c: char| c.is_ascii_digit()) {
        bail!("series {name}: prefix must not end with a digit");
    }
    if raw.pad_width == 0 || raw.pad_width > MAX_PAD_WIDTH {
        bail!("series {name}: pad_width must be in 1..={MAX_PAD_WIDTH}");
    }
    Ok(SeriesSpec::new(name, raw.prefix, raw.pad_width))
}
