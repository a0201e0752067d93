//! Candidates and the ordering that decides between them.

use std::cmp::Ordering;

use crate::error::ElectionError;

/// A process or actor proposing itself for leadership in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Identifier of the candidate, usually from an
    /// [`IdentifierAllocator`](crate::IdentifierAllocator).
    pub id: String,
    /// Registration time in Unix milliseconds. Earlier wins ties.
    pub timestamp: i64,
    /// Higher wins.
    pub priority: f64,
}

impl Candidate {
    pub fn new(id: impl Into<String>, timestamp: i64, priority: f64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            priority,
        }
    }

    /// Rejects candidates that cannot be named as leader.
    ///
    /// Ids are opaque; only an empty or all-whitespace id is refused.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.id.trim().is_empty() {
            return Err(ElectionError::InvalidCandidate {
                reason: "candidate id is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Orders candidates best first: priority descending, then timestamp
/// ascending, then id ascending.
///
/// Priorities use `f64::total_cmp`, so the order is total for every input.
pub fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.priority
        .total_cmp(&a.priority)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

/// Returns the best candidate, if any.
pub fn best<'a, I>(candidates: I) -> Option<&'a Candidate>
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates.into_iter().min_by(|a, b| rank(a, b))
}
