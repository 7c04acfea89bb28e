//! Error taxonomy for the consensus core (spec.md section 7).
use thiserror::Error;

/// Diagnostic context attached to a fatal invariant violation.
///
/// Carries exactly the fields spec.md section 7 requires a fatal
/// diagnostic to surface: creator, sequence, round-created, generation,
/// and the adjacent min-round bookkeeping.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Creator of the event that triggered the violation, if applicable.
    pub creator: Option<u32>,
    /// Sequence number of that event, if applicable.
    pub sequence: Option<u32>,
    /// Round-created of that event, if known.
    pub round_created: Option<i64>,
    /// Generation of that event, if known.
    pub generation: Option<i64>,
    /// The engine's `min-round` at the time of the violation.
    pub min_round: i64,
    /// Free-form description of what was found inconsistent.
    pub detail: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "creator={:?} sequence={:?} round_created={:?} generation={:?} min_round={} detail={}",
            self.creator, self.sequence, self.round_created, self.generation, self.min_round, self.detail
        )
    }
}

/// Why an event offered to `insert` was rejected without mutating state.
#[derive(Debug, Clone, Error)]
pub enum InvalidEventKind {
    /// `(creator, sequence)` already exists in the store with different bytes.
    #[error("duplicate (creator={creator}, sequence={sequence}) with differing bytes")]
    Duplicate {
        /// Creator whose sequence number collided.
        creator: u32,
        /// Colliding sequence number.
        sequence: u32,
    },
    /// `self-parent.sequence != sequence - 1`, or a referenced parent hash
    /// is not known to the store.
    #[error("invalid ancestry for (creator={creator}, sequence={sequence}): {detail}")]
    InvalidAncestry {
        /// Creator of the offending event.
        creator: u32,
        /// Sequence number of the offending event.
        sequence: u32,
        /// What about the ancestry was invalid.
        detail: String,
    },
}

/// Top-level error type returned by the consensus core.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal: a required invariant was violated. The core surfaces this
    /// diagnostic via `log::error!` before returning it; callers should
    /// treat it as unrecoverable for this engine instance.
    #[error("invariant violation: {0}")]
    InvariantViolation(Diagnostic),

    /// Recoverable: the caller offered a malformed or duplicate event.
    /// State is left unchanged.
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] InvalidEventKind),

    /// Recoverable at the process boundary: a snapshot handed to bootstrap
    /// was internally inconsistent. The core refuses to initialize.
    #[error("state load failure: {0}")]
    StateLoad(String),

    /// A `Config` value failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Construct an `InvariantViolation`, logging the diagnostic at error
    /// level before returning it, per spec.md section 7's propagation
    /// policy ("the core never swallows errors... fatal errors are
    /// surfaced via a single diagnostic channel and then re-raised").
    pub fn invariant(diagnostic: Diagnostic) -> Self {
        log::error!("{}", diagnostic);
        Error::InvariantViolation(diagnostic)
    }
}
