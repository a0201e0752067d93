//! One-call coordinator selection over a batch of candidates.

use tracing::debug;

use crate::candidate::Candidate;
use crate::error::ElectionError;
use crate::registry::ElectionRegistry;

/// Picks a single coordinator among `candidates` in `namespace`.
///
/// - No candidates: `None`, and the namespace is left untouched.
/// - One candidate: its id, without running an election. A one-voter round
///   would elect the same candidate.
/// - Otherwise every candidate is nominated into the namespace, then each
///   one is submitted to [`ElectionRegistry::start_election`] in order until
///   a round yields a leader. Because the whole batch is pending in that
///   round, the winner does not depend on input order.
///
/// Nominations are shared per namespace, so concurrent callers using the
/// same namespace can see each other's candidates in their rounds. Whatever
/// the outcome, nominations from this batch that no round consumed are
/// withdrawn before returning.
pub fn elect_coordinator(
    registry: &ElectionRegistry,
    candidates: &[Candidate],
    namespace: &str,
) -> Result<Option<String>, ElectionError> {
    match candidates {
        [] => return Ok(None),
        [only] => {
            only.validate()?;
            return Ok(Some(only.id.clone()));
        }
        _ => {}
    }

    for candidate in candidates {
        candidate.validate()?;
    }
    let outcome = nominate_and_elect(registry, candidates, namespace);
    // Anything of ours still pending did not take part in a round; leaving
    // it would hand a later caller's round a candidate nobody is waiting on.
    let withdrawn = registry.withdraw(namespace, candidates.iter().map(|c| c.id.as_str()));
    if withdrawn > 0 {
        debug!(namespace, withdrawn, "unused nominations withdrawn");
    }
    outcome
}

fn nominate_and_elect(
    registry: &ElectionRegistry,
    candidates: &[Candidate],
    namespace: &str,
) -> Result<Option<String>, ElectionError> {
    for candidate in candidates {
        registry.nominate(namespace, candidate.clone())?;
    }

    for candidate in candidates {
        let result = registry.start_election(namespace, candidate.clone())?;
        if let Some(leader) = result.leader {
            debug!(namespace, %leader, term = result.term, "coordinator selected");
            return Ok(Some(leader));
        }
    }

    debug!(namespace, candidates = candidates.len(), "no coordinator selected");
    Ok(None)
}
