//! Restart Policy Engine: a pure function from `(policy, failure_history, now)` to a
//! restart decision. No sleeping, no I/O — callers act on the returned decision.

use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::Deserialize;

/// Why a failure was recorded; feeds both the decision and the surfaced event.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    ProcessExit(i32),
    HealthFailure,
    ResourceViolation,
    StartupTimeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureEntry {
    pub at: SystemTime,
    pub reason: FailureReason,
}

/// A bounded, time-windowed log of failures for one agent. Entries older than the
/// configured `window` are pruned lazily on each `record`/`decide` call.
#[derive(Debug, Clone, Default)]
pub struct FailureHistory {
    entries: Vec<FailureEntry>,
}

impl FailureHistory {
    pub fn record(&mut self, reason: FailureReason, at: SystemTime, window: Duration) {
        self.entries.push(FailureEntry { at, reason });
        self.prune(at, window);
    }

    fn prune(&mut self, now: SystemTime, window: Duration) {
        self.entries.retain(|entry| {
            now.duration_since(entry.at)
                .map(|age| age <= window)
                .unwrap_or(true)
        });
    }

    pub fn count_within(&self, now: SystemTime, window: Duration) -> usize {
        self.entries
            .iter()
            .filter(|entry| {
                now.duration_since(entry.at)
                    .map(|age| age <= window)
                    .unwrap_or(true)
            })
            .count()
    }

    /// Number of consecutive failures at the tail of the log (used for exponential
    /// backoff's `k`), irrespective of the window.
    pub fn consecutive_failures(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all recorded failures; called after a successful manual start.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicyKind {
    #[default]
    Immediate,
    Delayed,
    ExponentialBackoff,
    Manual,
}

/// Configuration for a single agent's restart policy, as read from the fleet document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestartPolicyConfig {
    pub kind: RestartPolicyKind,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub delay: Option<Duration>,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub base: Option<Duration>,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub cap: Option<Duration>,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub jitter: Option<Duration>,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_window", deserialize_with = "duration_str::deserialize_duration")]
    pub window: Duration,
}

fn default_max_restarts() -> u32 {
    5
}

fn default_window() -> Duration {
    Duration::from_secs(3600)
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            kind: RestartPolicyKind::Immediate,
            delay: None,
            base: None,
            cap: None,
            jitter: None,
            max_restarts: default_max_restarts(),
            window: default_window(),
        }
    }
}

/// Outcome of consulting the restart policy engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RestartDecision {
    RestartNow,
    RestartAfter(SystemTime),
    GiveUp(String),
}

/// Evaluates `policy` against `history` as of `now`. Pure: no side effects, no I/O.
pub fn decide(
    policy: &RestartPolicyConfig,
    history: &FailureHistory,
    now: SystemTime,
) -> RestartDecision {
    let attempts_in_window = history.count_within(now, policy.window);
    if policy.max_restarts > 0 && attempts_in_window >= policy.max_restarts as usize {
        return RestartDecision::GiveUp(format!(
            "exceeded max_restarts ({}) within window ({:?})",
            policy.max_restarts, policy.window
        ));
    }

    match policy.kind {
        RestartPolicyKind::Manual => {
            RestartDecision::GiveUp("manual restart policy: operator action required".to_string())
        }
        RestartPolicyKind::Immediate => RestartDecision::RestartNow,
        RestartPolicyKind::Delayed => {
            let delay = policy.delay.unwrap_or(Duration::from_secs(1));
            RestartDecision::RestartAfter(now + delay)
        }
        RestartPolicyKind::ExponentialBackoff => {
            let base = policy.base.unwrap_or(Duration::from_secs(1));
            let cap = policy.cap.unwrap_or(Duration::from_secs(60));
            let k = history.consecutive_failures().max(1);
            let exponent = k.saturating_sub(1).min(32);
            let computed = base.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
            let mut delay = computed.min(cap);
            if let Some(jitter) = policy.jitter.filter(|j| !j.is_zero()) {
                let jitter_secs = rand::thread_rng().gen_range(0.0..=jitter.as_secs_f64());
                delay += Duration::from_secs_f64(jitter_secs);
            }
            RestartDecision::RestartAfter(now + delay)
        }
    }
}
