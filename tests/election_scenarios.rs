use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use evarbiter::{
    Candidate, ElectionError, ElectionRegistry, GovernorConfig, IdKind, IdentifierAllocator, LoadSampler,
    RegistryConfig, ResourceGovernor, detect_collisions, elect_coordinator,
};
use proptest::prelude::*;

fn registry() -> ElectionRegistry {
    ElectionRegistry::new(RegistryConfig {
        lock_wait_ms: 2_000,
        lock_poll_interval_ms: 1,
        ..RegistryConfig::default()
    })
}

#[test]
fn test_namespace_walkthrough() {
    let registry = registry();

    let first = registry.start_election("ns1", Candidate::new("p1", 100, 5.0)).unwrap();
    assert_eq!(first.leader.as_deref(), Some("p1"));
    assert_eq!(first.term, 1);

    let second = registry.start_election("ns1", Candidate::new("p2", 50, 9.0)).unwrap();
    assert_eq!(second.leader.as_deref(), Some("p2"));
    assert_eq!(second.term, 2);

    assert_eq!(elect_coordinator(&registry, &[], "ns2").unwrap(), None);
    assert_eq!(registry.namespaces(), vec!["ns1".to_string()]);

    let before = registry.get_current_state("ns1");
    registry.force_leader_change("ns1").unwrap();
    let after = registry.get_current_state("ns1");
    assert_eq!(after.leader, None);
    assert_eq!(after.term, before.term + 1);
}

#[test]
fn test_term_advances_once_per_round() {
    let registry = registry();
    for expected in 1..=20u64 {
        let result = registry
            .start_election("terms", Candidate::new(format!("c{expected}"), 0, 1.0))
            .unwrap();
        assert_eq!(result.term, expected);
    }
    registry.force_leader_change("terms").unwrap();
    assert_eq!(registry.get_current_state("terms").term, 21);
}

#[test]
fn test_concurrent_elections_never_overlap() {
    let registry = Arc::new(registry());
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..25)
                    .map(|j| {
                        registry
                            .start_election("shared", Candidate::new(format!("t{i}-{j}"), j, i as f64))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(results.len(), 400);

    // Calls that ran a round carry votes; observers carry none.
    let mut round_terms: Vec<u64> = results.iter().filter(|r| !r.votes.is_empty()).map(|r| r.term).collect();
    round_terms.sort_unstable();
    let expected: Vec<u64> = (1..=round_terms.len() as u64).collect();
    assert_eq!(round_terms, expected, "each round owns exactly one term");

    let state = registry.get_current_state("shared");
    assert_eq!(state.term, round_terms.len() as u64);
    assert!(state.leader.is_some());
    for result in &results {
        assert!(result.term <= state.term);
    }
}

#[test]
fn test_concurrent_namespaces_are_independent() {
    let registry = Arc::new(registry());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let namespace = format!("ns-{i}");
                for j in 0..10 {
                    registry.start_election(&namespace, Candidate::new("solo", j, 1.0)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        let state = registry.get_current_state(&format!("ns-{i}"));
        assert_eq!(state.term, 10);
        assert_eq!(state.leader.as_deref(), Some("solo"));
    }
}

#[test]
fn test_allocated_ids_elect_cleanly() {
    let allocator = IdentifierAllocator::default();
    let registry = registry();
    let batch: Vec<Candidate> = (0..5)
        .map(|i| Candidate::new(allocator.allocate(IdKind::Session), 1_000, f64::from(i)))
        .collect();
    assert!(detect_collisions(batch.iter().map(|c| c.id.as_str())).is_empty());

    let winner = elect_coordinator(&registry, &batch, "sessions").unwrap();
    assert_eq!(winner.as_deref(), Some(batch[4].id.as_str()));
}

#[test]
fn test_allocator_uniqueness_at_volume() {
    let allocator = IdentifierAllocator::default();
    let ids: Vec<String> = (0..10_000).map(|_| allocator.allocate(IdKind::Node)).collect();
    assert!(detect_collisions(&ids).is_empty());

    let mut injected = ids.clone();
    injected.push(ids[1234].clone());
    assert_eq!(detect_collisions(&injected), vec![ids[1234].clone()]);
}

struct BusyHost;

impl LoadSampler for BusyHost {
    fn cpu_percent(&self) -> f32 {
        100.0
    }

    fn memory_bytes(&self) -> u64 {
        0
    }
}

#[test]
fn test_throttled_election_leaves_no_trace() {
    let governor = Arc::new(ResourceGovernor::with_sampler(
        GovernorConfig {
            cpu_threshold_percent: 50.0,
            cpu_backoff_ms: 1,
            max_retries: 2,
            ..GovernorConfig::default()
        },
        Arc::new(BusyHost),
    ));
    let registry = registry().with_governor(governor);

    let err = registry.start_election("ns", Candidate::new("a", 0, 1.0)).unwrap_err();
    assert!(matches!(err, ElectionError::Throttled { attempts: 2, .. }));
    assert!(err.is_exhaustion());
    assert!(registry.namespaces().is_empty());
    assert_eq!(registry.get_current_state("ns").term, 0);
}

/// Reports full CPU until switched off.
struct LoadSpike {
    busy: AtomicBool,
}

impl LoadSampler for LoadSpike {
    fn cpu_percent(&self) -> f32 {
        if self.busy.load(Ordering::SeqCst) {
            100.0
        } else {
            0.0
        }
    }

    fn memory_bytes(&self) -> u64 {
        0
    }
}

#[test]
fn test_throttled_coordinator_withdraws_its_batch() {
    let spike = Arc::new(LoadSpike {
        busy: AtomicBool::new(true),
    });
    let governor = Arc::new(ResourceGovernor::with_sampler(
        GovernorConfig {
            cpu_threshold_percent: 50.0,
            cpu_backoff_ms: 1,
            max_retries: 1,
            sample_interval_ms: 0,
            ..GovernorConfig::default()
        },
        spike.clone(),
    ));
    let registry = registry().with_governor(governor);

    let batch = [Candidate::new("ghost", 0, 100.0), Candidate::new("other", 0, 1.0)];
    let err = elect_coordinator(&registry, &batch, "ns").unwrap_err();
    assert!(matches!(err, ElectionError::Throttled { attempts: 1, .. }));
    assert!(registry.pending("ns").is_empty());

    spike.busy.store(false, Ordering::SeqCst);
    let result = registry.start_election("ns", Candidate::new("real", 0, 5.0)).unwrap();
    assert_eq!(result.leader.as_deref(), Some("real"));
    assert_eq!(result.votes.len(), 1);
    assert_eq!(result.term, 1);
}

#[test]
fn test_governor_counts_elections() {
    let governor = Arc::new(ResourceGovernor::with_sampler(
        GovernorConfig {
            cpu_threshold_percent: 101.0,
            rate_window_ms: 60_000,
            max_operations_per_window: 3,
            cpu_backoff_ms: 1,
            max_retries: 1,
            ..GovernorConfig::default()
        },
        Arc::new(BusyHost),
    ));
    let registry = registry().with_governor(Arc::clone(&governor));

    for _ in 0..3 {
        registry.start_election("ns", Candidate::new("a", 0, 1.0)).unwrap();
    }
    assert_eq!(governor.recent_operations(), 3);

    let err = registry.start_election("ns", Candidate::new("a", 0, 1.0)).unwrap_err();
    assert!(matches!(err, ElectionError::Throttled { .. }));
    assert_eq!(registry.get_current_state("ns").term, 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_coordinator_independent_of_order(
        ids in proptest::collection::hash_set("[a-z0-9]{1,8}", 2..10),
        rotation in any::<usize>(),
    ) {
        let mut batch: Vec<Candidate> = ids.iter().map(|id| Candidate::new(id.clone(), 42, 3.0)).collect();
        let expected = ids.iter().min().cloned();

        let forward = elect_coordinator(&registry(), &batch, "perm").unwrap();
        let len = batch.len();
        batch.rotate_left(rotation % len);
        let rotated = elect_coordinator(&registry(), &batch, "perm").unwrap();
        batch.reverse();
        let reversed = elect_coordinator(&registry(), &batch, "perm").unwrap();

        prop_assert_eq!(&forward, &expected);
        prop_assert_eq!(&rotated, &expected);
        prop_assert_eq!(&reversed, &expected);
    }

    #[test]
    fn prop_singleton_returns_its_id(id in "[A-Za-z0-9_.-]{1,40}", ts in any::<i64>(), priority in any::<f64>()) {
        let registry = registry();
        let winner = elect_coordinator(&registry, &[Candidate::new(id.clone(), ts, priority)], "one").unwrap();
        prop_assert_eq!(winner, Some(id));
        prop_assert!(registry.namespaces().is_empty());
    }

    #[test]
    fn prop_terms_strictly_increase(rounds in 1usize..40) {
        let registry = registry();
        let mut seen = HashSet::new();
        let mut last = 0;
        for i in 0..rounds {
            let term = registry.start_election("mono", Candidate::new(format!("c{i}"), i as i64, 1.0)).unwrap().term;
            prop_assert_eq!(term, last + 1);
            prop_assert!(seen.insert(term));
            last = term;
        }
    }
}
