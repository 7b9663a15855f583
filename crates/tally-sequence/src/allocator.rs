use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tally_schemas::{
    format_degraded, max_suffix, SeriesCounter, SeriesSpec, StoreError, DEGRADED_SALT_SPACE,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{CasOutcome, CounterStore};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorPolicy {
    /// Read + conditional-commit rounds before giving up.
    pub max_attempts: u32,
    /// Issue a time-derived identifier when the counter is unreachable or
    /// corrupted instead of failing the request.
    pub degraded_fallback: bool,
}

impl Default for AllocatorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            degraded_fallback: true,
        }
    }
}

impl AllocatorPolicy {
    pub fn strict(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            degraded_fallback: false,
        }
    }
}

/// A freshly issued identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub series: String,
    pub identifier: String,
    /// Dense sequence value; `None` on the degraded path.
    pub sequence: Option<u64>,
    /// Counter rounds, or identifier claims on the degraded path.
    pub attempts: u32,
    pub degraded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("series not configured: {0}")]
    SeriesNotConfigured(String),

    #[error("allocation exhausted for series {series} after {attempts} attempts")]
    AllocationExhausted { series: String, attempts: u32 },

    #[error(transparent)]
    PersistenceFailure(#[from] StoreError),
}

impl AllocError {
    /// Only contention is worth resubmitting; configuration and store
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocError::AllocationExhausted { .. })
    }
}

/// Issues identifiers for a fixed registry of series.
///
/// Holds no mutable state of its own: every instance (in this process or
/// another) sharing the same store sees one counter per series.
pub struct SequenceAllocator<S: ?Sized> {
    store: Arc<S>,
    series: BTreeMap<String, SeriesSpec>,
    policy: AllocatorPolicy,
}

impl<S: CounterStore + ?Sized> SequenceAllocator<S> {
    pub fn new<I>(store: Arc<S>, series: I, policy: AllocatorPolicy) -> Self
    where
        I: IntoIterator<Item = SeriesSpec>,
    {
        let series = series.into_iter().map(|s| (s.name.clone(), s)).collect();
        let policy = AllocatorPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        Self {
            store,
            series,
            policy,
        }
    }

    pub fn policy(&self) -> AllocatorPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn spec(&self, series: &str) -> Result<&SeriesSpec, AllocError> {
        self.series
            .get(series)
            .ok_or_else(|| AllocError::SeriesNotConfigured(series.to_string()))
    }

    /// Next identifier for `series`.
    ///
    /// Either returns an identifier never returned before for the series or
    /// fails explicitly. Abandoning the returned value leaves a gap; it is
    /// never reissued.
    pub async fn allocate(&self, series: &str) -> Result<Allocation, AllocError> {
        let spec = self.spec(series)?;
        match self.allocate_strict(spec).await {
            Err(AllocError::PersistenceFailure(err))
                if self.policy.degraded_fallback && err.permits_degraded_fallback() =>
            {
                self.allocate_degraded(spec, &err).await
            }
            other => other,
        }
    }

    /// Counter-backed allocation only; store failures propagate.
    pub(crate) async fn allocate_strict(&self, spec: &SeriesSpec) -> Result<Allocation, AllocError> {
        for attempt in 1..=self.policy.max_attempts {
            let last = self.read_or_seed(spec).await?;
            let next = last.checked_add(1).ok_or_else(|| {
                StoreError::Corrupted(format!("series {} counter at u64::MAX", spec.name))
            })?;
            let candidate = spec.format(next);

            match self
                .store
                .compare_and_set(&spec.name, last, next, &candidate)
                .await?
            {
                CasOutcome::Committed => {
                    info!(series = %spec.name, identifier = %candidate, attempt, "identifier allocated");
                    return Ok(Allocation {
                        series: spec.name.clone(),
                        identifier: candidate,
                        sequence: Some(next),
                        attempts: attempt,
                        degraded: false,
                    });
                }
                CasOutcome::Conflict => {
                    debug!(series = %spec.name, expected = last, attempt, "counter moved; retrying");
                }
                CasOutcome::IdentifierTaken => {
                    warn!(
                        series = %spec.name,
                        identifier = %candidate,
                        attempt,
                        "candidate already recorded; value consumed, skipping"
                    );
                }
            }
        }

        warn!(
            series = %spec.name,
            attempts = self.policy.max_attempts,
            "allocation exhausted under contention"
        );
        Err(AllocError::AllocationExhausted {
            series: spec.name.clone(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Time-derived identifier, registered with the store so no two callers
    /// ever hold the same one. A taken candidate is redrawn with a new salt.
    async fn allocate_degraded(&self, spec: &SeriesSpec, cause: &StoreError) -> Result<Allocation, AllocError> {
        for attempt in 1..=self.policy.max_attempts {
            let identifier = degraded_candidate(spec);
            if self.store.claim_identifier(&spec.name, &identifier).await? {
                warn!(
                    series = %spec.name,
                    identifier = %identifier,
                    cause = %cause,
                    attempt,
                    degraded = true,
                    "counter unavailable; issued time-derived identifier"
                );
                return Ok(Allocation {
                    series: spec.name.clone(),
                    identifier,
                    sequence: None,
                    attempts: attempt,
                    degraded: true,
                });
            }
            debug!(series = %spec.name, identifier = %identifier, attempt, "degraded candidate taken; redrawing");
        }

        warn!(
            series = %spec.name,
            attempts = self.policy.max_attempts,
            cause = %cause,
            "degraded allocation exhausted"
        );
        Err(AllocError::AllocationExhausted {
            series: spec.name.clone(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Current `last_issued`, creating the counter on first use.
    async fn read_or_seed(&self, spec: &SeriesSpec) -> Result<u64, StoreError> {
        if let Some(counter) = self.store.load_counter(&spec.name).await? {
            return checked_last_issued(spec, &counter);
        }

        let existing = self.store.existing_numbers(&spec.name).await?;
        let seed = max_suffix(spec, existing.iter().map(String::as_str)).unwrap_or(0);

        if self.store.create_counter(spec, seed).await? {
            info!(series = %spec.name, seed, scanned = existing.len(), "series counter created");
            return Ok(seed);
        }

        // Another writer created it between our read and insert.
        match self.store.load_counter(&spec.name).await? {
            Some(counter) => checked_last_issued(spec, &counter),
            None => Err(StoreError::Corrupted(format!(
                "series {} counter missing after create conflict",
                spec.name
            ))),
        }
    }
}

fn checked_last_issued(spec: &SeriesSpec, counter: &SeriesCounter) -> Result<u64, StoreError> {
    if counter.prefix != spec.prefix || counter.pad_width != spec.pad_width {
        return Err(StoreError::Corrupted(format!(
            "series {} counter format {:?}/{} disagrees with configured {:?}/{}",
            spec.name, counter.prefix, counter.pad_width, spec.prefix, spec.pad_width
        )));
    }
    Ok(counter.last_issued)
}

fn degraded_candidate(spec: &SeriesSpec) -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let salt = Uuid::new_v4().as_u128() % u128::from(DEGRADED_SALT_SPACE);
    format_degraded(spec, millis, u64::try_from(salt).unwrap_or(0))
}
