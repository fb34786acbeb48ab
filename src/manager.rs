//! Agent Manager: the orchestrator. Owns the fleet, drives start/stop/restart,
//! schedules probes and sampling, reacts to failures via the restart policy engine,
//! applies configuration deltas, and exposes the synchronous public API described
//! in §4.7.1 as a facade over an internal event loop (§5, §9).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error, info, warn};

use crate::agent::{AgentRecord, AgentStatus, LifecycleState};
use crate::config::{restart_required, AgentChange, ConfigStore, FleetConfig, SharedConfigStore};
use crate::error::{AgentControlError, LifecycleError};
use crate::event::cancellation::CancellationMessage;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::event::{LifecycleEvent, ManagerEvent};
use crate::health::{self, HealthHttpClient, HealthSample};
use crate::process::Spawner;
use crate::resource::{ProcessMetricsSource, ResourceLimitKind, Severity};
use crate::restart::{self, RestartDecision};
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};

/// Per-agent set of long-lived worker threads (probe, sampler, exit watcher), owned by
/// the manager and torn down by `stop`/`emergency_stop`/full shutdown.
struct AgentWorkers {
    probe: Option<StartedThreadContext>,
    sampler: Option<StartedThreadContext>,
    reaper: Option<StartedThreadContext>,
}

impl AgentWorkers {
    fn stop_all(&mut self) {
        for ctx in [self.probe.take(), self.sampler.take(), self.reaper.take()] {
            if let Some(ctx) = ctx {
                let name = ctx.thread_name().to_string();
                if let Err(err) = ctx.stop() {
                    warn!(thread = name, "error stopping worker thread: {err}");
                }
            }
        }
    }
}

type SharedRecord = Arc<Mutex<AgentRecord>>;

/// The orchestrator. Cloning an `AgentManager` is cheap (it's a handle over shared,
/// internally-synchronized state) — every collaborator it hands out (probe threads,
/// sampler threads, the supervisor loop) holds one of these rather than a raw
/// back-pointer.
#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<Inner>,
}

struct Inner {
    config_store: SharedConfigStore,
    spawner: Arc<dyn Spawner>,
    health_client: Arc<dyn HealthHttpClient>,
    metrics_source: Arc<Mutex<dyn ProcessMetricsSource>>,
    records: Mutex<HashMap<String, SharedRecord>>,
    workers: Mutex<HashMap<String, AgentWorkers>>,
    manager_events: (EventPublisher<ManagerEvent>, EventConsumer<ManagerEvent>),
    lifecycle_events: EventPublisher<LifecycleEvent>,
    supervisor: Mutex<Option<StartedThreadContext>>,
}

impl AgentManager {
    pub fn new(
        config_store: SharedConfigStore,
        spawner: Arc<dyn Spawner>,
        health_client: Arc<dyn HealthHttpClient>,
        metrics_source: Arc<Mutex<dyn ProcessMetricsSource>>,
    ) -> (Self, EventConsumer<LifecycleEvent>) {
        let (lifecycle_publisher, lifecycle_consumer) = pub_sub();
        let manager_events = pub_sub();

        let active = config_store.active();
        let mut records = HashMap::new();
        for (name, descriptor) in &active.agents {
            records.insert(name.clone(), Arc::new(Mutex::new(AgentRecord::new(descriptor.clone()))));
        }

        let manager = Self {
            inner: Arc::new(Inner {
                config_store,
                spawner,
                health_client,
                metrics_source,
                records: Mutex::new(records),
                workers: Mutex::new(HashMap::new()),
                manager_events,
                lifecycle_events: lifecycle_publisher,
                supervisor: Mutex::new(None),
            }),
        };
        manager.spawn_supervisor();
        (manager, lifecycle_consumer)
    }

    fn defaults(&self) -> crate::config::Defaults {
        self.inner.config_store.active().defaults
    }

    fn record(&self, name: &str) -> Result<SharedRecord, AgentControlError> {
        self.inner
            .records
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownAgent(name.to_string()).into())
    }

    fn emit_lifecycle(&self, agent: &str, prior: LifecycleState, new: LifecycleState, reason: &str) {
        if matches!(new, LifecycleState::GaveUp) {
            error!(agent, ?prior, ?new, reason, "agent transitioned state");
        } else if matches!(new, LifecycleState::Degraded | LifecycleState::Crashed) {
            warn!(agent, ?prior, ?new, reason, "agent transitioned state");
        } else {
            info!(agent, ?prior, ?new, reason, "agent transitioned state");
        }
        let _ = self.inner.lifecycle_events.publish(LifecycleEvent {
            timestamp: SystemTime::now(),
            agent: agent.to_string(),
            prior_state: prior,
            new_state: new,
            reason: reason.to_string(),
            details: None,
        });
    }

    // ---- Public API (§4.7.1) -------------------------------------------------

    /// Idempotent: starting a `Running` (or otherwise live) agent is a no-op returning
    /// `true`. Returns `false` if `wait_for_health` was requested and the startup
    /// deadline elapsed first.
    pub fn start(&self, name: &str, wait_for_health: bool) -> Result<bool, AgentControlError> {
        let record = self.record(name)?;

        {
            let guard = record.lock().unwrap();
            if !guard.descriptor.enabled {
                return Err(LifecycleError::Disabled(name.to_string()).into());
            }
            if guard.state().is_live() {
                return Ok(true);
            }
        }

        let defaults = self.defaults();
        let prior = record.lock().unwrap().state();
        record.lock().unwrap().spawn(self.inner.spawner.as_ref(), SystemTime::now())?;
        self.emit_lifecycle(name, prior, LifecycleState::Starting, "start requested");
        self.start_workers(name, record.clone());

        if !wait_for_health {
            return Ok(true);
        }

        let startup_timeout = record.lock().unwrap().descriptor.effective_startup_timeout(&defaults);
        let deadline = Instant::now() + startup_timeout;
        loop {
            let state = record.lock().unwrap().state();
            if state == LifecycleState::Running {
                record.lock().unwrap().reset_restart_bookkeeping();
                return Ok(true);
            }
            if !state.is_live() {
                return Ok(false);
            }
            if Instant::now() >= deadline {
                record.lock().unwrap().mark_startup_timeout(SystemTime::now());
                self.emit_lifecycle(name, LifecycleState::Starting, LifecycleState::Crashed, "startup timed out");
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Idempotent: stopping an already-`Stopped` agent is a no-op returning `true`.
    pub fn stop(&self, name: &str, timeout: Duration) -> Result<bool, AgentControlError> {
        let record = self.record(name)?;
        let prior = record.lock().unwrap().state();
        if prior == LifecycleState::Stopped {
            return Ok(true);
        }

        self.stop_workers(name);
        record.lock().unwrap().request_stop(timeout)?;
        self.emit_lifecycle(name, prior, LifecycleState::Stopped, "stop requested");
        Ok(true)
    }

    /// Serial `stop` then `start`, preserving the configured startup-health wait.
    pub fn restart(&self, name: &str) -> Result<bool, AgentControlError> {
        let timeout = {
            let record = self.record(name)?;
            let defaults = self.defaults();
            record.lock().unwrap().descriptor.effective_shutdown_timeout(&defaults)
        };
        self.stop(name, timeout)?;
        self.start(name, true)
    }

    /// Orchestrated startup (§4.7.2): tiers of `enabled && auto_start` agents, bounded
    /// concurrency within a tier, `halt_on_failure` governs whether a tier failure
    /// aborts the remaining tiers.
    pub fn start_all(&self) -> Result<HashMap<String, bool>, AgentControlError> {
        let config = self.inner.config_store.active();
        let names = config.enabled_auto_start_names();
        let graph = config.graph().map_err(|err| AgentControlError::Internal(err.to_string()))?;
        let tiers = graph.restricted_to(&names).start_order();

        let mut results = HashMap::new();
        'tiers: for tier in tiers {
            for chunk in tier.chunks(config.defaults.max_parallel_spawns.max(1)) {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|name| {
                        let manager = self.clone();
                        let name = name.clone();
                        std::thread::spawn(move || {
                            let outcome = manager.start(&name, true).unwrap_or(false);
                            (name, outcome)
                        })
                    })
                    .collect();
                for handle in handles {
                    if let Ok((name, outcome)) = handle.join() {
                        results.insert(name, outcome);
                    }
                }
            }
            if config.defaults.halt_on_failure && chunk_failed(&tier, &results) {
                warn!("halting orchestrated startup: a tier failed and halt_on_failure is set");
                break 'tiers;
            }
        }
        Ok(results)
    }

    /// Orchestrated shutdown (§4.7.3): reverse tier order, parallel graceful stop
    /// within a tier, force-kill stragglers after `shutdown_timeout`.
    pub fn stop_all(&self) -> Result<HashMap<String, bool>, AgentControlError> {
        let config = self.inner.config_store.active();
        let live_names: std::collections::HashSet<String> = self
            .inner
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.lock().unwrap().state() != LifecycleState::Stopped)
            .map(|(n, _)| n.clone())
            .collect();
        let graph = config.graph().map_err(|err| AgentControlError::Internal(err.to_string()))?;
        let tiers = graph.restricted_to(&live_names).stop_order();

        let mut results = HashMap::new();
        for tier in tiers {
            let handles: Vec<_> = tier
                .iter()
                .map(|name| {
                    let manager = self.clone();
                    let name = name.clone();
                    let timeout = config
                        .agents
                        .get(&name)
                        .map(|d| d.effective_shutdown_timeout(&config.defaults))
                        .unwrap_or(config.defaults.shutdown_timeout);
                    std::thread::spawn(move || {
                        let outcome = manager.stop(&name, timeout).unwrap_or(false);
                        (name, outcome)
                    })
                })
                .collect();
            for handle in handles {
                if let Ok((name, outcome)) = handle.join() {
                    results.insert(name, outcome);
                }
            }
        }
        Ok(results)
    }

    /// Best-effort, immediate force-kill of every child process group, bypassing
    /// grace periods. No restart is scheduled for any agent touched by this call.
    pub fn emergency_stop(&self) {
        let names: Vec<String> = self.inner.records.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.stop_workers(&name);
            if let Ok(record) = self.record(&name) {
                let prior = record.lock().unwrap().state();
                if prior != LifecycleState::Stopped {
                    record.lock().unwrap().force_kill();
                    self.emit_lifecycle(&name, prior, LifecycleState::Stopped, "emergency stop");
                }
            }
        }
    }

    pub fn status(&self, name: &str) -> Result<AgentStatus, AgentControlError> {
        Ok(self.record(name)?.lock().unwrap().status())
    }

    pub fn status_all(&self) -> Vec<AgentStatus> {
        let records = self.inner.records.lock().unwrap();
        let mut statuses: Vec<AgentStatus> = records.values().map(|r| r.lock().unwrap().status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Configuration reconciliation (§4.7.6): diff against the active version, then
    /// stop/drop removed agents, restart agents whose command/cwd/env changed,
    /// hot-apply everything else, and start newly-added auto-start agents — all in
    /// dependency order.
    pub fn apply_config(&self, new_config: FleetConfig) -> Result<u64, AgentControlError> {
        let old_config = self.inner.config_store.active();
        let version = self.inner.config_store.apply(new_config.clone())?;
        let changes = ConfigStore::diff(&old_config, &new_config);

        {
            let mut records = self.inner.records.lock().unwrap();
            for (name, change) in &changes {
                match change {
                    AgentChange::Added => {
                        records.entry(name.clone()).or_insert_with(|| {
                            Arc::new(Mutex::new(AgentRecord::new(new_config.agents[name].clone())))
                        });
                    }
                    AgentChange::Mutated { .. } => {
                        if let Some(record) = records.get(name) {
                            record.lock().unwrap().descriptor = new_config.agents[name].clone();
                        }
                    }
                    AgentChange::Removed | AgentChange::Unchanged => {}
                }
            }
        }

        let graph = new_config.graph().map_err(|err| AgentControlError::Internal(err.to_string()))?;
        let order = graph.start_order().concat();

        for name in order.iter().filter(|n| {
            matches!(changes.get(*n), Some(AgentChange::Mutated { fields }) if restart_required(fields))
        }) {
            info!(agent = name.as_str(), "restarting agent: reconfiguration changed its process identity");
            let _ = self.restart(name);
        }

        for name in &order {
            if matches!(changes.get(name), Some(AgentChange::Added)) {
                let descriptor = &new_config.agents[name];
                if descriptor.enabled && descriptor.auto_start {
                    let _ = self.start(name, true);
                }
            }
        }

        for (name, change) in &changes {
            if *change == AgentChange::Removed {
                let timeout = old_config
                    .agents
                    .get(name)
                    .map(|d| d.effective_shutdown_timeout(&old_config.defaults))
                    .unwrap_or(old_config.defaults.shutdown_timeout);
                let _ = self.stop(name, timeout);
                self.inner.records.lock().unwrap().remove(name);
            }
        }

        Ok(version)
    }

    /// Cancels every long-lived task: probes, samplers, reapers and the supervisor
    /// loop. Does not stop running child processes — call `stop_all`/`emergency_stop`
    /// first if that's desired.
    pub fn shutdown(&self) {
        let names: Vec<String> = self.inner.workers.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.stop_workers(&name);
        }
        if let Some(ctx) = self.inner.supervisor.lock().unwrap().take() {
            let _ = ctx.stop();
        }
    }

    // ---- Internal worker lifecycle -------------------------------------------

    fn start_workers(&self, name: &str, record: SharedRecord) {
        let defaults = self.defaults();
        let probe = self.spawn_probe(name, record.clone(), defaults.probe_interval);
        let sampler = self.spawn_sampler(name, record.clone(), defaults.sample_interval);
        let reaper = self.spawn_reaper(name, record);
        self.inner.workers.lock().unwrap().insert(
            name.to_string(),
            AgentWorkers {
                probe: Some(probe),
                sampler: Some(sampler),
                reaper: Some(reaper),
            },
        );
    }

    fn stop_workers(&self, name: &str) {
        if let Some(mut workers) = self.inner.workers.lock().unwrap().remove(name) {
            workers.stop_all();
        }
    }

    /// Sensor thread: issues health probes and records samples. Lifecycle
    /// transitions and restart decisions are made by the supervisor reacting to the
    /// `ManagerEvent`s this publishes, not by this thread directly.
    fn spawn_probe(&self, name: &str, record: SharedRecord, interval: Duration) -> StartedThreadContext {
        let health_client = self.inner.health_client.clone();
        let events = self.inner.manager_events.0.clone();
        let agent_name = name.to_string();

        NotStartedThreadContext::new(format!("probe-{name}"), move |stop| {
            let mut consecutive_http_failures = 0u32;
            loop {
                let starting = matches!(record.lock().unwrap().state(), LifecycleState::Starting);
                let wait = if starting { Duration::from_secs(2) } else { interval };
                if stop.is_cancelled(wait) {
                    return;
                }

                let (url, probe_timeout) = {
                    let guard = record.lock().unwrap();
                    if !guard.state().is_live() {
                        continue;
                    }
                    (guard.descriptor.health_endpoint(), (interval.min(Duration::from_secs(5))) / 2)
                };

                let started_at = std::time::Instant::now();
                let result = health_client.get(&url, probe_timeout);
                let latency = started_at.elapsed();
                let (outcome, body) = health::classify(&result, consecutive_http_failures);
                match &result {
                    Ok(r) if !(200..300).contains(&r.status) => consecutive_http_failures += 1,
                    Ok(_) => consecutive_http_failures = 0,
                    Err(_) => {}
                }

                let sample = HealthSample {
                    timestamp: SystemTime::now(),
                    outcome,
                    latency,
                    body,
                };
                {
                    let mut guard = record.lock().unwrap();
                    guard.record_health_sample(sample.clone());
                    if guard.state() == LifecycleState::Starting && outcome == health::HealthOutcome::Healthy {
                        guard.mark_running();
                    }
                }
                let _ = events.publish(ManagerEvent::HealthOutcome {
                    agent: agent_name.clone(),
                    outcome,
                    at: sample.timestamp,
                });
            }
        })
        .start()
    }

    /// Sensor thread: samples per-PID resource usage and reports threshold crossings;
    /// does not itself decide to restart or kill anything.
    fn spawn_sampler(&self, name: &str, record: SharedRecord, interval: Duration) -> StartedThreadContext {
        let metrics_source = self.inner.metrics_source.clone();
        let events = self.inner.manager_events.0.clone();
        let agent_name = name.to_string();

        NotStartedThreadContext::new(format!("sampler-{name}"), move |stop| loop {
            if stop.is_cancelled(interval) {
                return;
            }
            let pid = {
                let guard = record.lock().unwrap();
                if !guard.state().is_live() {
                    continue;
                }
                guard.pid()
            };
            let Some(pid) = pid else { continue };
            let Some(sample) = metrics_source.lock().unwrap().sample(pid) else {
                continue;
            };

            let hits = {
                let mut guard = record.lock().unwrap();
                let hits = guard.descriptor.resource_limits.exceeded(&sample);
                guard.record_resource_sample(sample);
                hits
            };
            for (kind, severity) in hits {
                let _ = events.publish(ManagerEvent::ResourceAlert {
                    agent: agent_name.clone(),
                    kind,
                    severity,
                    at: SystemTime::now(),
                });
            }
        })
        .start()
    }

    /// Sensor thread: polls for an exited child, reporting it rather than acting on
    /// it (a stop already in flight owns the transition to `Stopped` instead).
    fn spawn_reaper(&self, name: &str, record: SharedRecord) -> StartedThreadContext {
        let events = self.inner.manager_events.0.clone();
        let agent_name = name.to_string();
        const POLL_INTERVAL: Duration = Duration::from_millis(250);

        NotStartedThreadContext::new(format!("reaper-{name}"), move |stop| loop {
            if stop.is_cancelled(POLL_INTERVAL) {
                return;
            }
            let exit_code = {
                let mut guard = record.lock().unwrap();
                if matches!(guard.state(), LifecycleState::Stopping | LifecycleState::Stopped) {
                    continue;
                }
                guard.poll_exit()
            };
            if let Some(code) = exit_code {
                let _ = events.publish(ManagerEvent::ProcessExit {
                    agent: agent_name.clone(),
                    exit_code: code,
                    at: SystemTime::now(),
                });
            }
        })
        .start()
    }

    /// The single supervising task (§5): routes `ManagerEvent`s to the owning
    /// record, applying the one lifecycle-state-mutating reaction per event type and
    /// then consulting the restart policy engine. Per-agent events are processed in
    /// receipt order; cross-agent events are not ordered relative to each other.
    fn spawn_supervisor(&self) {
        let manager = self.clone();
        let consumer = self.inner.manager_events.1.clone();
        let ctx = NotStartedThreadContext::new("agent-manager-supervisor", move |stop: EventConsumer<CancellationMessage>| loop {
            if stop.is_cancelled(Duration::from_millis(0)) {
                return;
            }
            match consumer.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => manager.handle_event(event),
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
            }
        })
        .start();
        *self.inner.supervisor.lock().unwrap() = Some(ctx);
    }

    fn handle_event(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::HealthOutcome { agent, outcome, .. } => self.handle_health_outcome(&agent, outcome),
            ManagerEvent::ResourceAlert { agent, kind, severity, .. } => {
                self.handle_resource_alert(&agent, kind, severity)
            }
            ManagerEvent::ProcessExit { agent, exit_code, .. } => self.handle_process_exit(&agent, exit_code),
        }
    }

    /// A degraded/unreachable/invalid probe result only acts once the configured
    /// `sustained_duration` of consecutive unhealthy samples has elapsed, per §4.3.
    fn handle_health_outcome(&self, agent: &str, outcome: health::HealthOutcome) {
        if outcome == health::HealthOutcome::Healthy {
            return;
        }
        let Ok(record) = self.record(agent) else { return };
        let defaults = self.defaults();
        let sustained = record
            .lock()
            .unwrap()
            .health_history()
            .is_sustained_unhealthy(defaults.unhealthy_threshold, defaults.sustained_duration);
        if !sustained {
            return;
        }
        let prior = record.lock().unwrap().state();
        if prior != LifecycleState::Running {
            return;
        }
        record.lock().unwrap().mark_degraded(SystemTime::now());
        self.emit_lifecycle(agent, prior, LifecycleState::Degraded, "sustained unhealthy probes");
        self.evaluate_restart(agent, &record);
    }

    /// `Warning` is advisory only. `Critical` records a failure and, after
    /// `resource_grace_period`, is weighed by the restart policy. `Emergency`
    /// force-kills immediately, then consults the restart policy just like any other
    /// recorded failure, per §4.7.7.
    fn handle_resource_alert(&self, agent: &str, kind: ResourceLimitKind, severity: Severity) {
        if severity == Severity::Warning {
            return;
        }
        let Ok(record) = self.record(agent) else { return };

        if severity == Severity::Emergency {
            self.stop_workers(agent);
            let prior = record.lock().unwrap().state();
            record.lock().unwrap().force_kill();
            debug!(agent, ?kind, "force-killed for emergency resource violation");
            self.emit_lifecycle(agent, prior, LifecycleState::Stopped, "emergency resource violation");
            record.lock().unwrap().mark_resource_violation(SystemTime::now());
            self.evaluate_restart(agent, &record);
            return;
        }

        record.lock().unwrap().mark_resource_violation(SystemTime::now());
        let grace = self.defaults().resource_grace_period;
        if grace.is_zero() {
            self.evaluate_restart(agent, &record);
        } else {
            self.schedule_grace_period_check(agent.to_string(), grace);
        }
    }

    fn handle_process_exit(&self, agent: &str, exit_code: i32) {
        let Ok(record) = self.record(agent) else { return };
        let prior = record.lock().unwrap().state();
        if matches!(prior, LifecycleState::Stopping | LifecycleState::Stopped) {
            return;
        }
        record.lock().unwrap().observe_exit(exit_code, SystemTime::now());
        self.emit_lifecycle(agent, prior, LifecycleState::Crashed, &format!("process exited with code {exit_code}"));
        self.evaluate_restart(agent, &record);
    }

    fn evaluate_restart(&self, agent: &str, record: &SharedRecord) {
        let policy = record.lock().unwrap().descriptor.restart_policy.clone();
        let now = SystemTime::now();
        let decision = {
            let guard = record.lock().unwrap();
            restart::decide(&policy, guard.failure_history(), now)
        };

        match decision {
            RestartDecision::RestartNow => self.act_on_restart(agent, record),
            RestartDecision::RestartAfter(at) => {
                {
                    let mut guard = record.lock().unwrap();
                    guard.set_next_restart_at(Some(at));
                    guard.mark_backing_off();
                }
                self.schedule_restart(agent.to_string(), at);
            }
            RestartDecision::GiveUp(reason) => {
                let prior = record.lock().unwrap().state();
                record.lock().unwrap().mark_gave_up(reason.clone());
                self.emit_lifecycle(agent, prior, LifecycleState::GaveUp, &reason);
            }
        }
    }

    fn act_on_restart(&self, agent: &str, record: &SharedRecord) {
        record.lock().unwrap().increment_restart_count();
        self.stop_workers(agent);
        let _ = self.start(agent, false);
    }

    fn schedule_restart(&self, agent: String, at: SystemTime) {
        let manager = self.clone();
        crate::utils::threads::spawn_named_thread(&format!("restart-timer-{agent}"), move || {
            if let Ok(sleep_for) = at.duration_since(SystemTime::now()) {
                std::thread::sleep(sleep_for);
            }
            if let Ok(record) = manager.record(&agent) {
                if record.lock().unwrap().state() == LifecycleState::BackingOff {
                    manager.act_on_restart(&agent, &record);
                }
            }
        });
    }

    fn schedule_grace_period_check(&self, agent: String, grace: Duration) {
        let manager = self.clone();
        crate::utils::threads::spawn_named_thread(&format!("resource-grace-{agent}"), move || {
            std::thread::sleep(grace);
            if let Ok(record) = manager.record(&agent) {
                if record.lock().unwrap().state().is_live() {
                    manager.evaluate_restart(&agent, &record);
                }
            }
        });
    }
}

fn chunk_failed(tier: &[String], results: &HashMap<String, bool>) -> bool {
    tier.iter().any(|name| results.get(name) == Some(&false))
}
