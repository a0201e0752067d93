//! Backpressure gate for election-triggering work.
//!
//! The governor decides whether a caller should delay or abort based on
//! sampled CPU load, a sliding operation-rate window and a process memory
//! ceiling. Elections stay correct without it; it only bounds how hard
//! they can hit the host.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use sysinfo::Pid;
use sysinfo::System;
use tracing::debug;
use tracing::warn;

use crate::config::GovernorConfig;
use crate::error::ElectionError;

/// Source of load measurements.
pub trait LoadSampler: Send + Sync {
    /// Global CPU usage in percent.
    fn cpu_percent(&self) -> f32;

    /// Resident memory of the current process in bytes.
    fn memory_bytes(&self) -> u64;
}

/// [`LoadSampler`] backed by `sysinfo`.
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "current pid unavailable, memory ceiling disabled");
                None
            }
        };
        let mut system = System::new();
        // The first CPU reading needs a baseline refresh.
        system.refresh_cpu();

        Self {
            system: Mutex::new(system),
            pid,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SystemSampler {
    fn cpu_percent(&self) -> f32 {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.global_cpu_info().cpu_usage()
    }

    fn memory_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Why the governor asked the caller to hold off.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleReason {
    MemoryCeiling { used_bytes: u64, ceiling_bytes: u64 },
    CpuLoad { percent: f32 },
    OperationRate { operations: usize, window_ms: u64 },
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleReason::MemoryCeiling {
                used_bytes,
                ceiling_bytes,
            } => write!(f, "memory {} bytes over ceiling {}", used_bytes, ceiling_bytes),
            ThrottleReason::CpuLoad { percent } => write!(f, "cpu load {:.1}%", percent),
            ThrottleReason::OperationRate { operations, window_ms } => {
                write!(f, "operation rate {}/{}ms", operations, window_ms)
            }
        }
    }
}

/// Result of [`ResourceGovernor::should_throttle`].
///
/// A throttle with `wait_ms` asks the caller to retry later; a throttle
/// without one asks the caller to abort.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDecision {
    pub throttle: bool,
    pub reason: Option<ThrottleReason>,
    pub wait_ms: Option<u64>,
}

impl ThrottleDecision {
    fn allow() -> Self {
        Self {
            throttle: false,
            reason: None,
            wait_ms: None,
        }
    }

    fn delay(reason: ThrottleReason, wait_ms: u64) -> Self {
        Self {
            throttle: true,
            reason: Some(reason),
            wait_ms: Some(wait_ms),
        }
    }

    fn refuse(reason: ThrottleReason) -> Self {
        Self {
            throttle: true,
            reason: Some(reason),
            wait_ms: None,
        }
    }

    fn reason_text(&self) -> String {
        self.reason.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}

struct GovernorState {
    /// Start times of recent operations, oldest first.
    operations: VecDeque<Instant>,
    cpu_percent: f32,
    sampled_at: Option<Instant>,
}

/// CPU, rate and memory throttle.
pub struct ResourceGovernor {
    config: GovernorConfig,
    sampler: Arc<dyn LoadSampler>,
    state: Mutex<GovernorState>,
}

impl ResourceGovernor {
    /// Creates a governor sampling the host through `sysinfo`.
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_sampler(config, Arc::new(SystemSampler::new()))
    }

    pub fn with_sampler(config: GovernorConfig, sampler: Arc<dyn LoadSampler>) -> Self {
        Self {
            config,
            sampler,
            state: Mutex::new(GovernorState {
                operations: VecDeque::new(),
                cpu_percent: 0.0,
                sampled_at: None,
            }),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Decides whether the next operation should wait or abort.
    pub fn should_throttle(&self) -> ThrottleDecision {
        if let Some(ceiling_bytes) = self.config.memory_ceiling_bytes {
            let used_bytes = self.sampler.memory_bytes();
            if used_bytes > ceiling_bytes {
                return ThrottleDecision::refuse(ThrottleReason::MemoryCeiling {
                    used_bytes,
                    ceiling_bytes,
                });
            }
        }

        let now = Instant::now();
        let mut state = self.state.lock();

        let stale = state.sampled_at.is_none_or(|at| {
            now.duration_since(at) >= Duration::from_millis(self.config.sample_interval_ms)
        });
        if stale {
            state.cpu_percent = self.sampler.cpu_percent();
            state.sampled_at = Some(now);
        }
        if state.cpu_percent > self.config.cpu_threshold_percent {
            return ThrottleDecision::delay(
                ThrottleReason::CpuLoad {
                    percent: state.cpu_percent,
                },
                self.config.cpu_backoff_ms,
            );
        }

        let window = Duration::from_millis(self.config.rate_window_ms);
        prune(&mut state.operations, now, window);
        if state.operations.len() >= self.config.max_operations_per_window {
            let wait = state
                .operations
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return ThrottleDecision::delay(
                ThrottleReason::OperationRate {
                    operations: state.operations.len(),
                    window_ms: self.config.rate_window_ms,
                },
                (wait.as_millis() as u64).max(1),
            );
        }

        ThrottleDecision::allow()
    }

    /// Records that an operation started now.
    pub fn record_operation(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        prune(&mut state.operations, now, Duration::from_millis(self.config.rate_window_ms));
        state.operations.push_back(now);
    }

    /// Operations inside the current window.
    pub fn recent_operations(&self) -> usize {
        let mut state = self.state.lock();
        prune(
            &mut state.operations,
            Instant::now(),
            Duration::from_millis(self.config.rate_window_ms),
        );
        state.operations.len()
    }

    /// Waits out throttle decisions, up to `max_retries` attempts.
    ///
    /// Fails with [`ElectionError::Throttled`] once the budget is spent and
    /// with [`ElectionError::ResourceExhausted`] when the governor refuses
    /// outright.
    pub fn admit(&self) -> Result<(), ElectionError> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let decision = self.should_throttle();
            if !decision.throttle {
                return Ok(());
            }

            let Some(wait_ms) = decision.wait_ms else {
                let reason = decision.reason_text();
                warn!(%reason, "operation refused by resource governor");
                return Err(ElectionError::ResourceExhausted { reason });
            };

            if attempt >= attempts {
                let reason = decision.reason_text();
                warn!(attempts, %reason, "throttle retry budget exhausted");
                return Err(ElectionError::Throttled { attempts, reason });
            }

            debug!(attempt, wait_ms, reason = %decision.reason_text(), "throttled, backing off");
            thread::sleep(Duration::from_millis(wait_ms));
            attempt += 1;
        }
    }
}

fn prune(operations: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = operations.front() {
        if now.duration_since(*oldest) < window {
            break;
        }
        operations.pop_front();
    }
}
