//! Scheduler configuration.

use std::time::Duration;

/// What the scheduler does when a fault can be pinned on one client channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Stop scheduling and surface the error. A broken invariant is never papered over.
    #[default]
    Abort,
    /// Close the offending channel, drop its queued requests and keep serving the rest.
    Isolate,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between a completed grant and the next poll.
    pub guard_interval: Duration,
    /// Pause after a sweep that found nothing while no slot is pending. Zero
    /// still yields to the runtime once.
    pub idle_backoff: Duration,
    /// How long a grantee may stay silent before each stall warning.
    pub stall_warning: Duration,
    /// Arbitration seed. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub violation_policy: ViolationPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            guard_interval: Duration::from_millis(700),
            idle_backoff: Duration::from_millis(1),
            stall_warning: Duration::from_secs(5),
            seed: None,
            violation_policy: ViolationPolicy::Abort,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guard_interval(mut self, interval: Duration) -> Self {
        self.guard_interval = interval;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_stall_warning(mut self, after: Duration) -> Self {
        self.stall_warning = after;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.violation_policy = policy;
        self
    }
}
