//! Per-namespace election state machines.
//!
//! Each namespace carries its own exclusion flag, term and leader. Within a
//! namespace only one election computation runs at a time; namespaces are
//! fully independent of each other.
//!
//! This is a local arbitration primitive. Candidates are logical entries in
//! one process and "voting" is a deterministic ranking, so it offers none of
//! the guarantees of a quorum protocol across machines.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::candidate::Candidate;
use crate::config::RegistryConfig;
use crate::error::ElectionError;
use crate::governor::ResourceGovernor;
use crate::timer::ElectionTimer;
use crate::vote;
use crate::vote::Votes;

/// Outcome of an election round, or a snapshot of committed state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionResult {
    /// Committed leader, absent when no candidate reached a majority or
    /// leadership was cleared.
    pub leader: Option<String>,
    pub term: u64,
    /// Empty for snapshots.
    pub votes: Votes,
}

struct ElectionState {
    current_leader: Option<String>,
    current_term: u64,
    pending_candidates: HashMap<String, Candidate>,
    election_timer: Option<ElectionTimer>,
    /// Bumped whenever the timer is cancelled or replaced, so a timer that
    /// fires late cannot clear a newer leader.
    timer_generation: u64,
    /// Set once the namespace is removed from the registry. Callers that
    /// still hold it must look the name up again.
    retired: bool,
}

impl ElectionState {
    fn new(current_term: u64) -> Self {
        Self {
            current_leader: None,
            current_term,
            pending_candidates: HashMap::new(),
            election_timer: None,
            timer_generation: 0,
            retired: false,
        }
    }

    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.election_timer.take() {
            timer.cancel();
        }
    }

    fn snapshot(&self) -> ElectionResult {
        ElectionResult {
            leader: self.current_leader.clone(),
            term: self.current_term,
            votes: Votes::new(),
        }
    }
}

struct Namespace {
    name: String,
    electing: AtomicBool,
    state: Mutex<ElectionState>,
}

/// Holds a namespace's election flag; clears it on drop, including unwinds.
struct ElectionFlag<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ElectionFlag<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Namespace {
    fn new(name: &str, term: u64) -> Self {
        Self {
            name: name.to_string(),
            electing: AtomicBool::new(false),
            state: Mutex::new(ElectionState::new(term)),
        }
    }

    fn try_acquire(&self) -> Option<ElectionFlag<'_>> {
        self.electing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ElectionFlag { flag: &self.electing })
    }

    fn acquire_within(&self, wait: Duration, poll: Duration) -> Option<ElectionFlag<'_>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(flag) = self.try_acquire() {
                return Some(flag);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(poll);
        }
    }

    /// Polls until no election is running or `wait` elapses.
    fn wait_idle(&self, wait: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + wait;
        while self.electing.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
        true
    }

    fn expire(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.timer_generation != generation {
            return;
        }
        state.election_timer = None;
        if let Some(leader) = state.current_leader.take() {
            debug!(
                namespace = %self.name,
                term = state.current_term,
                %leader,
                "election timeout expired, leader cleared"
            );
        }
    }
}

/// Election state for every namespace, shared by reference between callers.
pub struct ElectionRegistry {
    config: RegistryConfig,
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
    /// Last term of each removed namespace, so a recreated one continues it.
    retired_terms: Mutex<HashMap<String, u64>>,
    governor: Option<Arc<ResourceGovernor>>,
}

impl ElectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        assert!(
            config.lock_poll_interval_ms > 0,
            "REGISTRY: lock_poll_interval_ms must be positive"
        );
        Self {
            config,
            namespaces: Mutex::new(HashMap::new()),
            retired_terms: Mutex::new(HashMap::new()),
            governor: None,
        }
    }

    /// Gates every election behind `governor`'s admission policy.
    pub fn with_governor(mut self, governor: Arc<ResourceGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Runs one election round in `namespace` with `candidate` registered.
    ///
    /// If another round is already running, this call does not start a
    /// second one: it waits up to `lock_wait_ms` for that round to finish
    /// and returns the committed state instead.
    pub fn start_election(&self, namespace: &str, candidate: Candidate) -> Result<ElectionResult, ElectionError> {
        candidate.validate()?;
        if let Some(governor) = &self.governor {
            governor.admit()?;
            governor.record_operation();
        }

        loop {
            let ns = self.namespace_or_create(namespace)?;
            let Some(_flag) = ns.try_acquire() else {
                debug!(
                    namespace,
                    candidate = %candidate.id,
                    "election in progress, observing committed state"
                );
                if !ns.wait_idle(self.lock_wait(), self.lock_poll()) {
                    debug!(namespace, "competing election still running after wait");
                }
                return Ok(ns.state.lock().snapshot());
            };

            let mut state = ns.state.lock();
            if state.retired {
                continue;
            }
            state.cancel_timer();
            state.pending_candidates.insert(candidate.id.clone(), candidate);
            state.current_term += 1;
            let term = state.current_term;

            let votes = vote::collect_votes(&state.pending_candidates);
            let leader = vote::tally(&votes);
            if let Some(leader) = &leader {
                state.current_leader = Some(leader.clone());
            }
            state.pending_candidates.clear();

            let delay = self.election_timeout();
            if let Err(source) = arm_timer(&ns, &mut state, delay) {
                if leader.is_some() {
                    state.current_leader = None;
                }
                warn!(namespace, term, error = %source, "failed to arm election timer, leadership withdrawn");
                return Err(ElectionError::TimerSpawn { source });
            }

            match &leader {
                Some(leader) => info!(
                    namespace,
                    term,
                    %leader,
                    voters = votes.len(),
                    timeout_ms = delay.as_millis() as u64,
                    "election committed"
                ),
                None => info!(namespace, term, voters = votes.len(), "election ended without majority"),
            }

            return Ok(ElectionResult { leader, term, votes });
        }
    }

    /// Committed leader and term of `namespace`. Never waits on a running election.
    pub fn get_current_state(&self, namespace: &str) -> ElectionResult {
        match self.lookup(namespace) {
            Some(ns) => ns.state.lock().snapshot(),
            None => ElectionResult::default(),
        }
    }

    /// True if `namespace` has no leader or `candidate_id` already leads it.
    pub fn can_become_leader(&self, namespace: &str, candidate_id: &str) -> bool {
        self.get_current_state(namespace)
            .leader
            .is_none_or(|leader| leader == candidate_id)
    }

    /// Clears the leader of `namespace` and advances its term.
    ///
    /// Administrative failover. It takes the same election flag as
    /// [`start_election`](Self::start_election), waiting up to
    /// `lock_wait_ms`, and fails with [`ElectionError::ElectionInProgress`]
    /// if a round keeps the namespace busy longer. Returns the new term.
    pub fn force_leader_change(&self, namespace: &str) -> Result<u64, ElectionError> {
        loop {
            let ns = self.namespace_or_create(namespace)?;
            let Some(_flag) = ns.acquire_within(self.lock_wait(), self.lock_poll()) else {
                warn!(namespace, "forced leader change gave up waiting for running election");
                return Err(ElectionError::ElectionInProgress {
                    namespace: namespace.to_string(),
                });
            };

            let mut state = ns.state.lock();
            if state.retired {
                continue;
            }
            state.cancel_timer();
            let previous = state.current_leader.take();
            state.current_term += 1;
            info!(namespace, term = state.current_term, previous = ?previous, "leader change forced");
            return Ok(state.current_term);
        }
    }

    /// Registers `candidate` for the next round of `namespace` without running it.
    ///
    /// Nominations are shared: any caller's next round in this namespace
    /// counts every pending nomination, including other callers'.
    pub fn nominate(&self, namespace: &str, candidate: Candidate) -> Result<(), ElectionError> {
        candidate.validate()?;
        loop {
            let ns = self.namespace_or_create(namespace)?;
            let mut state = ns.state.lock();
            if state.retired {
                continue;
            }
            debug!(namespace, candidate = %candidate.id, pending = state.pending_candidates.len() + 1, "candidate nominated");
            state.pending_candidates.insert(candidate.id.clone(), candidate);
            return Ok(());
        }
    }

    /// Removes the given ids from the pending set of `namespace`.
    ///
    /// Returns how many were still pending. Unknown namespaces are left
    /// alone.
    pub fn withdraw<'a, I>(&self, namespace: &str, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(ns) = self.lookup(namespace) else {
            return 0;
        };
        let mut state = ns.state.lock();
        let withdrawn = ids
            .into_iter()
            .filter(|id| state.pending_candidates.remove(*id).is_some())
            .count();
        if withdrawn > 0 {
            debug!(namespace, withdrawn, pending = state.pending_candidates.len(), "nominations withdrawn");
        }
        withdrawn
    }

    /// Ids nominated for the next round of `namespace`, sorted.
    pub fn pending(&self, namespace: &str) -> Vec<String> {
        let Some(ns) = self.lookup(namespace) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = ns.state.lock().pending_candidates.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Restarts the leader timeout if `candidate_id` still leads `namespace`.
    ///
    /// The term does not change. Returns false once leadership was lost.
    pub fn renew_lease(&self, namespace: &str, candidate_id: &str) -> Result<bool, ElectionError> {
        let Some(ns) = self.lookup(namespace) else {
            return Ok(false);
        };
        let mut state = ns.state.lock();
        if state.current_leader.as_deref() != Some(candidate_id) {
            return Ok(false);
        }

        state.cancel_timer();
        let delay = self.election_timeout();
        if let Err(source) = arm_timer(&ns, &mut state, delay) {
            state.current_leader = None;
            warn!(namespace, error = %source, "failed to re-arm election timer, leadership withdrawn");
            return Err(ElectionError::TimerSpawn { source });
        }
        debug!(namespace, leader = candidate_id, timeout_ms = delay.as_millis() as u64, "lease renewed");
        Ok(true)
    }

    /// Drops the leader, nominations and timer of `namespace`. Returns
    /// whether it existed.
    ///
    /// Takes the election flag like
    /// [`force_leader_change`](Self::force_leader_change) and fails with
    /// [`ElectionError::ElectionInProgress`] if a round holds it past
    /// `lock_wait_ms`. The term is kept aside, so a namespace recreated
    /// under the same name continues from it.
    pub fn remove_namespace(&self, namespace: &str) -> Result<bool, ElectionError> {
        let Some(ns) = self.lookup(namespace) else {
            return Ok(false);
        };
        let Some(_flag) = ns.acquire_within(self.lock_wait(), self.lock_poll()) else {
            warn!(namespace, "namespace removal gave up waiting for running election");
            return Err(ElectionError::ElectionInProgress {
                namespace: namespace.to_string(),
            });
        };

        let term = {
            let mut state = ns.state.lock();
            if state.retired {
                return Ok(false);
            }
            state.retired = true;
            state.cancel_timer();
            state.current_leader = None;
            state.pending_candidates.clear();
            state.current_term
        };

        // Unlinked while the flag is still held, so no round can start on
        // the retired entry in between.
        let mut namespaces = self.namespaces.lock();
        if namespaces.get(namespace).is_some_and(|live| Arc::ptr_eq(live, &ns)) {
            namespaces.remove(namespace);
        }
        self.retired_terms.lock().insert(namespace.to_string(), term);
        debug!(namespace, term, "namespace removed");
        Ok(true)
    }

    /// Names of all live namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, namespace: &str) -> Option<Arc<Namespace>> {
        self.namespaces.lock().get(namespace).cloned()
    }

    fn namespace_or_create(&self, namespace: &str) -> Result<Arc<Namespace>, ElectionError> {
        let mut namespaces = self.namespaces.lock();
        if let Some(ns) = namespaces.get(namespace) {
            return Ok(Arc::clone(ns));
        }
        if namespaces.len() >= self.config.max_namespaces {
            warn!(namespace, max = self.config.max_namespaces, "namespace limit reached");
            return Err(ElectionError::NamespaceLimit {
                max: self.config.max_namespaces,
            });
        }

        let term = self.retired_terms.lock().remove(namespace).unwrap_or(0);
        let ns = Arc::new(Namespace::new(namespace, term));
        namespaces.insert(namespace.to_string(), Arc::clone(&ns));
        debug!(namespace, "namespace created");
        Ok(ns)
    }

    fn election_timeout(&self) -> Duration {
        let min = self.config.election_timeout_min_ms;
        let max = self.config.election_timeout_max_ms;
        let ms = if max > min { rand::rng().random_range(min..max) } else { min };
        Duration::from_millis(ms)
    }

    fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.config.lock_wait_ms)
    }

    fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.config.lock_poll_interval_ms)
    }
}

impl Default for ElectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

/// Replaces the namespace's timer with one that clears the leader after `delay`.
fn arm_timer(ns: &Arc<Namespace>, state: &mut ElectionState, delay: Duration) -> std::io::Result<()> {
    state.cancel_timer();
    let generation = state.timer_generation;
    let weak: Weak<Namespace> = Arc::downgrade(ns);
    let timer = ElectionTimer::arm("election-timer".to_string(), delay, move || {
        if let Some(ns) = weak.upgrade() {
            ns.expire(generation);
        }
    })?;
    state.election_timer = Some(timer);
    Ok(())
}
