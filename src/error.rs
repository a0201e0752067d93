//! Error types for elections and their admission gate.

use snafu::Snafu;

/// Errors from election operations.
///
/// An election that ends without a majority is not an error: it returns
/// `Ok` with an absent leader.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ElectionError {
    /// The candidate failed validation.
    #[snafu(display("invalid candidate: {reason}"))]
    InvalidCandidate {
        /// What was wrong with the candidate.
        reason: String,
    },

    /// The governor kept throttling until the retry budget ran out.
    #[snafu(display("throttled after {attempts} attempts: {reason}"))]
    Throttled {
        /// Number of admission attempts made.
        attempts: u32,
        /// Reason given by the last throttle decision.
        reason: String,
    },

    /// The governor refused outright (memory ceiling exceeded).
    #[snafu(display("resources exhausted: {reason}"))]
    ResourceExhausted {
        /// Reason given by the governor.
        reason: String,
    },

    /// An election held the namespace for longer than the wait budget.
    #[snafu(display("election in progress for namespace '{namespace}'"))]
    ElectionInProgress {
        /// The contended namespace.
        namespace: String,
    },

    /// The registry already tracks the maximum number of namespaces.
    #[snafu(display("namespace limit reached ({max})"))]
    NamespaceLimit {
        /// Configured namespace bound.
        max: usize,
    },

    /// The election timeout task could not be started.
    #[snafu(display("failed to arm election timer: {source}"))]
    TimerSpawn {
        /// The underlying spawn error.
        source: std::io::Error,
    },
}

impl ElectionError {
    /// Returns true for resource exhaustion, where callers should back off
    /// instead of retrying immediately.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            ElectionError::Throttled { .. } | ElectionError::ResourceExhausted { .. }
        )
    }
}
