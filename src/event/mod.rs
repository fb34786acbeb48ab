//! Cross-thread event types and the channel primitives used to carry them.

pub mod cancellation;
pub mod channel;

use crate::health::HealthOutcome;
use crate::resource::{ResourceLimitKind, Severity};
use std::time::SystemTime;

/// Events routed to the supervisor loop from probe, sampler and child-exit watcher threads.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    HealthOutcome {
        agent: String,
        outcome: HealthOutcome,
        at: SystemTime,
    },
    ResourceAlert {
        agent: String,
        kind: ResourceLimitKind,
        severity: Severity,
        at: SystemTime,
    },
    ProcessExit {
        agent: String,
        exit_code: i32,
        at: SystemTime,
    },
}

/// A non-trivial lifecycle transition, reported on the fleet-wide event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub timestamp: SystemTime,
    pub agent: String,
    pub prior_state: crate::agent::LifecycleState,
    pub new_state: crate::agent::LifecycleState,
    pub reason: String,
    pub details: Option<String>,
}
