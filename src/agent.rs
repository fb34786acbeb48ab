//! Agent Record: per-agent mutable state, exclusively owned by the manager and
//! serialized behind its own mutex — lifecycle status, pid, counters, telemetry.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::config::AgentDescriptor;
use crate::error::{LifecycleError, SpawnError};
use crate::health::{HealthHistory, HealthOutcome, HealthSample, DEFAULT_SCORE_WINDOW};
use crate::process::{SpawnSpec, StartedProcess, Spawner, DEFAULT_TAIL_CAPACITY};
use crate::resource::{RingBuffer, ResourceSample, DEFAULT_RING_BUFFER_CAPACITY};
use crate::restart::{FailureHistory, FailureReason};

/// Bound on `last_error`'s retained length.
const MAX_LAST_ERROR_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
    Crashed,
    BackingOff,
    GaveUp,
}

impl LifecycleState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Degraded | Self::Stopping)
    }
}

/// Read-only copy of an [`AgentRecord`] returned from `status`/`status_all`; cheap to
/// clone, safe to hand to a caller without holding the record's lock.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub restart_count: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub health_score: u8,
    pub last_health_outcome: Option<HealthOutcome>,
    pub next_restart_at: Option<SystemTime>,
    pub latest_resource_sample: Option<ResourceSample>,
}

/// Mutable, process-wide per-agent state. Owned exclusively by the [`crate::manager::AgentManager`];
/// every mutation happens through `&mut self`, and callers serialize access per-agent
/// (the manager wraps one of these in a per-agent `Mutex`).
pub struct AgentRecord {
    pub descriptor: AgentDescriptor,
    state: LifecycleState,
    process: Option<StartedProcess>,
    started_at: Option<SystemTime>,
    restart_count: u32,
    last_error: Option<String>,
    health_history: HealthHistory,
    failure_history: FailureHistory,
    samples: RingBuffer,
    next_restart_at: Option<SystemTime>,
}

impl AgentRecord {
    pub fn new(descriptor: AgentDescriptor) -> Self {
        Self {
            descriptor,
            state: LifecycleState::Stopped,
            process: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
            health_history: HealthHistory::new(DEFAULT_SCORE_WINDOW),
            failure_history: FailureHistory::default(),
            samples: RingBuffer::new(DEFAULT_RING_BUFFER_CAPACITY),
            next_restart_at: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid())
    }

    pub fn failure_history(&self) -> &FailureHistory {
        &self.failure_history
    }

    pub fn failure_history_mut(&mut self) -> &mut FailureHistory {
        &mut self.failure_history
    }

    pub fn health_history(&self) -> &HealthHistory {
        &self.health_history
    }

    pub fn samples(&self) -> &RingBuffer {
        &self.samples
    }

    pub fn set_next_restart_at(&mut self, at: Option<SystemTime>) {
        self.next_restart_at = at;
    }

    pub fn next_restart_at(&self) -> Option<SystemTime> {
        self.next_restart_at
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn record_resource_sample(&mut self, sample: ResourceSample) {
        self.samples.push(sample);
    }

    pub fn record_health_sample(&mut self, sample: HealthSample) {
        if matches!(sample.outcome, HealthOutcome::Degraded | HealthOutcome::Unreachable) {
            self.health_history.record_http_status_failure();
        }
        self.health_history.record(sample);
    }

    pub fn set_last_error(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        message.truncate(MAX_LAST_ERROR_LEN);
        self.last_error = Some(message);
    }

    /// A read-only snapshot suitable for returning to an external caller.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            name: self.descriptor.name.clone(),
            state: self.state,
            pid: self.pid(),
            started_at: self.started_at,
            restart_count: self.restart_count,
            consecutive_failures: self.failure_history.consecutive_failures(),
            last_error: self.last_error.clone(),
            health_score: self.health_history.health_score(),
            last_health_outcome: self.health_history.latest().map(|s| s.outcome),
            next_restart_at: self.next_restart_at,
            latest_resource_sample: self.samples.latest().copied(),
        }
    }

    /// Launches the child process in a new process group; transitions `Stopped ->
    /// Starting`. Idempotent in spirit with the manager's `start`: the manager checks
    /// `is_live()` before calling this.
    pub fn spawn(&mut self, spawner: &dyn Spawner, now: SystemTime) -> Result<(), SpawnError> {
        let spec = SpawnSpec {
            program: self.descriptor.start_command[0].clone(),
            args: self.descriptor.start_command[1..].to_vec(),
            working_directory: self.descriptor.working_directory.clone(),
            environment: self.descriptor.environment.clone().into_iter().collect(),
        };
        match spawner.spawn(&spec) {
            Ok(process) => {
                self.process = Some(process);
                self.started_at = Some(now);
                self.state = LifecycleState::Starting;
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                self.state = LifecycleState::Crashed;
                Err(err)
            }
        }
    }

    /// Called once a health probe reports `Healthy` while `Starting`: transitions
    /// `Starting -> Running`.
    pub fn mark_running(&mut self) {
        if self.state == LifecycleState::Starting {
            self.state = LifecycleState::Running;
        }
    }

    /// Called when `await_healthy`'s deadline elapses without a `Healthy` outcome:
    /// records a `StartupTimeout` failure and transitions to `Crashed`.
    pub fn mark_startup_timeout(&mut self, now: SystemTime) {
        self.failure_history.record(
            FailureReason::StartupTimeout,
            now,
            self.descriptor.restart_policy.window,
        );
        self.set_last_error("startup timed out waiting for a healthy probe");
        self.state = LifecycleState::Crashed;
    }

    /// Sustained-unhealthy transition driven by the health probe, per §4.3.
    pub fn mark_degraded(&mut self, now: SystemTime) {
        if self.state == LifecycleState::Running {
            self.state = LifecycleState::Degraded;
        }
        self.failure_history.record(
            FailureReason::HealthFailure,
            now,
            self.descriptor.restart_policy.window,
        );
    }

    /// A resource sample crossed a threshold; recorded as a failure so the restart
    /// policy engine can see it, without changing lifecycle state by itself (the
    /// manager decides whether to restart at `Critical`/force-kill at `Emergency`).
    pub fn mark_resource_violation(&mut self, now: SystemTime) {
        self.failure_history.record(
            FailureReason::ResourceViolation,
            now,
            self.descriptor.restart_policy.window,
        );
    }

    /// Sends a graceful termination signal and waits up to `timeout`; force-kills on
    /// expiry. Transitions to `Stopped` regardless of how the child actually exited.
    pub fn request_stop(&mut self, timeout: Duration) -> Result<(), LifecycleError> {
        self.state = LifecycleState::Stopping;
        if let Some(process) = self.process.as_mut() {
            let _ = process.terminate_group();
            match process.wait_timeout(timeout) {
                Ok(Some(_)) => {}
                _ => {
                    let _ = process.force_kill();
                    let _ = process.wait_timeout(Duration::from_secs(5));
                }
            }
        }
        self.process = None;
        self.state = LifecycleState::Stopped;
        Ok(())
    }

    /// Best-effort, immediate: used by `emergency_stop`, bypassing graceful signaling.
    pub fn force_kill(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.force_kill();
        }
        self.process = None;
        self.state = LifecycleState::Stopped;
    }

    /// Asynchronous exit notification: `Running -> Crashed` unless already `Stopping`
    /// (a stop in flight owns the transition to `Stopped` instead).
    pub fn observe_exit(&mut self, exit_code: i32, now: SystemTime) {
        if self.state == LifecycleState::Stopping {
            return;
        }
        self.process = None;
        self.failure_history.record(
            FailureReason::ProcessExit(exit_code),
            now,
            self.descriptor.restart_policy.window,
        );
        self.set_last_error(format!("process exited with code {exit_code}"));
        self.state = LifecycleState::Crashed;
    }

    pub fn mark_backing_off(&mut self) {
        self.state = LifecycleState::BackingOff;
    }

    pub fn mark_gave_up(&mut self, reason: impl Into<String>) {
        self.set_last_error(reason);
        self.state = LifecycleState::GaveUp;
    }

    /// Resets restart bookkeeping; called only after a successful manual start.
    pub fn reset_restart_bookkeeping(&mut self) {
        self.restart_count = 0;
        self.failure_history.clear();
    }

    pub fn increment_restart_count(&mut self) {
        self.restart_count += 1;
    }

    pub fn stdout_tail(&self) -> Vec<String> {
        self.process.as_ref().map(|p| p.stdout_tail()).unwrap_or_default()
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.process.as_ref().map(|p| p.stderr_tail()).unwrap_or_default()
    }

    pub fn tail_capacity() -> usize {
        DEFAULT_TAIL_CAPACITY
    }

    /// Non-blocking check for an exited child, used by the reaper loop.
    pub fn poll_exit(&mut self) -> Option<i32> {
        let exited = self.process.as_mut()?.try_wait().ok()??;
        Some(exited.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse, AgentDescriptor};

    fn descriptor() -> AgentDescriptor {
        let config = parse(
            r#"
version: 1
agents:
  a:
    working_directory: "/tmp"
    start_command: ["sh", "-c", "sleep 1"]
    health_url: "http://localhost:9001"
"#,
        )
        .unwrap();
        config.agents["a"].clone()
    }

    #[test]
    fn new_record_starts_stopped() {
        let record = AgentRecord::new(descriptor());
        assert_eq!(record.state(), LifecycleState::Stopped);
        assert!(record.pid().is_none());
    }

    #[test]
    fn spawn_transitions_to_starting() {
        use crate::process::OsSpawner;
        let mut record = AgentRecord::new(descriptor());
        record.spawn(&OsSpawner::new(64), SystemTime::now()).unwrap();
        assert_eq!(record.state(), LifecycleState::Starting);
        assert!(record.pid().is_some());
        record.request_stop(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn mark_running_only_applies_from_starting() {
        let mut record = AgentRecord::new(descriptor());
        record.mark_running();
        assert_eq!(record.state(), LifecycleState::Stopped);
    }

    #[test]
    fn observe_exit_ignored_while_stopping() {
        let mut record = AgentRecord::new(descriptor());
        record.request_stop(Duration::from_millis(1)).unwrap();
        record.observe_exit(1, SystemTime::now());
        assert_eq!(record.state(), LifecycleState::Stopped);
    }

    #[test]
    fn observe_exit_transitions_running_to_crashed() {
        use crate::process::OsSpawner;
        let mut record = AgentRecord::new(descriptor());
        record.spawn(&OsSpawner::new(64), SystemTime::now()).unwrap();
        record.mark_running();
        record.observe_exit(7, SystemTime::now());
        assert_eq!(record.state(), LifecycleState::Crashed);
        assert!(record.failure_history().consecutive_failures() >= 1);
    }

    #[test]
    fn reset_restart_bookkeeping_clears_counters() {
        let mut record = AgentRecord::new(descriptor());
        record.increment_restart_count();
        record
            .failure_history_mut()
            .record(FailureReason::ProcessExit(1), SystemTime::now(), Duration::from_secs(60));
        record.reset_restart_bookkeeping();
        assert_eq!(record.restart_count(), 0);
        assert!(record.failure_history().is_empty());
    }

    #[test]
    fn last_error_is_truncated() {
        let mut record = AgentRecord::new(descriptor());
        record.set_last_error("x".repeat(5_000));
        let status = record.status();
        assert_eq!(status.last_error.unwrap().len(), MAX_LAST_ERROR_LEN);
    }
}
