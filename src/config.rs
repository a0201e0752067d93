//! Configuration for the registry, the governor and the identifier allocator.
//!
//! All structs deserialize with `#[serde(default)]`, so a host application
//! can embed them in its own config file and override individual fields.

use serde::Deserialize;

/// Configuration for an [`ElectionRegistry`](crate::ElectionRegistry).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a caller waits for a competing election before observing
    /// the committed state instead.
    pub lock_wait_ms: u64,
    /// Poll interval while waiting for a competing election.
    pub lock_poll_interval_ms: u64,
    /// Lower bound (inclusive) of the randomized leader timeout.
    pub election_timeout_min_ms: u64,
    /// Upper bound (exclusive) of the randomized leader timeout.
    pub election_timeout_max_ms: u64,
    /// Maximum number of live namespaces.
    pub max_namespaces: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 1_000,
            lock_poll_interval_ms: 10,
            election_timeout_min_ms: 5_000,
            election_timeout_max_ms: 10_000,
            max_namespaces: 1_024,
        }
    }
}

/// Configuration for a [`ResourceGovernor`](crate::ResourceGovernor).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernorConfig {
    /// Global CPU usage above which work is delayed.
    pub cpu_threshold_percent: f32,
    /// Delay suggested when CPU is above threshold.
    pub cpu_backoff_ms: u64,
    /// Sliding window length for the operation rate.
    pub rate_window_ms: u64,
    /// Operations allowed inside one window.
    pub max_operations_per_window: usize,
    /// Resident memory ceiling for this process; `None` disables the check.
    pub memory_ceiling_bytes: Option<u64>,
    /// Admission attempts before giving up with a throttled error.
    pub max_retries: u32,
    /// Minimum spacing between CPU samples.
    pub sample_interval_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: 90.0,
            cpu_backoff_ms: 100,
            rate_window_ms: 1_000,
            max_operations_per_window: 100,
            memory_ceiling_bytes: None,
            max_retries: 5,
            sample_interval_ms: 500,
        }
    }
}

/// Configuration for an [`IdentifierAllocator`](crate::IdentifierAllocator).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Fixed machine tag; derived from the host name when absent.
    pub machine_tag: Option<u32>,
    /// The sequence counter wraps to zero at this bound.
    pub sequence_bound: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            machine_tag: None,
            sequence_bound: 1_000_000,
        }
    }
}
