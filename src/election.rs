use tracing::warn;

use crate::candidate::Candidate;
use crate::registry::ElectionRegistry;

/// Leadership from the point of view of one contender.
///
/// Several logical candidates may compete for the same role, but only one
/// may act on it at a time. This trait is the seam between a process that
/// needs exclusive leadership and whatever arbitrates it.
///
/// Semantics:
/// - Once a contender acquires leadership, no other contender can claim it
///   until the lease lapses or an operator forces a change.
/// - Leadership is lease-based with a timeout, allowing failover if the leader
///   stops renewing.
/// - A contender that fails to renew should stop acting as leader immediately.
pub trait Election: Sync {
    /// Attempts to acquire leadership.
    ///
    /// Returns `true` if this contender is the leader afterwards.
    fn elect(&self) -> bool;

    /// Renews the leadership lease.
    ///
    /// Returns `true` if the lease was successfully renewed.
    fn renew(&self) -> bool;
}

/// A single candidate's seat in one namespace of an [`ElectionRegistry`].
///
/// Implements [`Election`] so a long-running process can contend for
/// leadership the same way it would against any other election backend.
pub struct Contender<'a> {
    registry: &'a ElectionRegistry,
    namespace: String,
    candidate: Candidate,
}

impl<'a> Contender<'a> {
    pub fn new(registry: &'a ElectionRegistry, namespace: impl Into<String>, candidate: Candidate) -> Self {
        Self {
            registry,
            namespace: namespace.into(),
            candidate,
        }
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns `true` if this candidate currently leads its namespace.
    pub fn is_leader(&self) -> bool {
        self.registry.get_current_state(&self.namespace).leader.as_deref() == Some(self.candidate.id.as_str())
    }
}

impl Election for Contender<'_> {
    fn elect(&self) -> bool {
        if !self.registry.can_become_leader(&self.namespace, &self.candidate.id) {
            return false;
        }
        match self.registry.start_election(&self.namespace, self.candidate.clone()) {
            Ok(result) => result.leader.as_deref() == Some(self.candidate.id.as_str()),
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    candidate = %self.candidate.id,
                    error = %e,
                    "election attempt failed"
                );
                false
            }
        }
    }

    fn renew(&self) -> bool {
        match self.registry.renew_lease(&self.namespace, &self.candidate.id) {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    candidate = %self.candidate.id,
                    error = %e,
                    "lease renewal failed"
                );
                false
            }
        }
    }
}
