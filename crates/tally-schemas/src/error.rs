/// Failures at the persistence boundary.
///
/// The expected compare-and-set race is *not* an error; stores report it as
/// an outcome value. Everything here is either infrastructure trouble or
/// data that cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backing store unreachable (connect, pool, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row exists but cannot be decoded or contradicts its own invariants.
    #[error("store data corrupted: {0}")]
    Corrupted(String),

    /// The store refused a write for a reason other than the CAS race.
    #[error("store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Unreachable or corrupted counter state. Only these permit the
    /// allocator's degraded fallback.
    pub fn permits_degraded_fallback(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Corrupted(_))
    }
}
