//! Pure vote collection and tallying.
//!
//! These functions are deterministic and side-effect free; the registry
//! calls them while holding a namespace's election flag.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::candidate;
use crate::candidate::Candidate;

/// Voter id to chosen candidate id.
pub type Votes = BTreeMap<String, String>;

/// Every pending candidate votes for the best-ranked pending candidate.
///
/// This simulates unanimous voting between logical candidates in one
/// process. Peers on separate machines would need real ballots collected
/// over a quorum protocol instead.
pub fn collect_votes(pending: &HashMap<String, Candidate>) -> Votes {
    let Some(choice) = candidate::best(pending.values()) else {
        return Votes::new();
    };
    pending
        .keys()
        .map(|voter| (voter.clone(), choice.id.clone()))
        .collect()
}

/// Smallest vote count that is strictly more than half of `total`.
#[inline]
pub fn majority_threshold(total: usize) -> usize {
    total / 2 + 1
}

/// Returns the winner if one choice holds a strict plurality and a majority.
pub fn tally(votes: &Votes) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for choice in votes.values() {
        *counts.entry(choice.as_str()).or_default() += 1;
    }

    let max = counts.values().copied().max()?;
    let mut leaders = counts.iter().filter(|(_, count)| **count == max);
    let (winner, _) = leaders.next()?;
    if leaders.next().is_some() {
        return None;
    }

    (max >= majority_threshold(votes.len())).then(|| (*winner).to_string())
}
