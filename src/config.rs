//! Config Store: the authoritative [`FleetConfig`] description, loaded from a YAML
//! document, validated, and applied atomically with a bounded version history.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::event::channel::{pub_sub, EventConsumer, EventPublisher};
use crate::graph::{DependencyGraph, DependencyGraphError, GraphNode};
use crate::resource::ResourceLimits;
use crate::restart::RestartPolicyConfig;

/// Default bounded history depth (§4.1: "default 10").
pub const DEFAULT_HISTORY_DEPTH: usize = 10;
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_PRIORITY: i64 = 100;

fn default_probe_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_startup_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_max_parallel_spawns() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}
fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

/// The `defaults:` block of the configuration document; per-agent fields fall back to
/// these when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Defaults {
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub probe_interval: Duration,
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub sample_interval: Duration,
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub shutdown_timeout: Duration,
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub startup_timeout: Duration,
    pub max_parallel_spawns: usize,
    pub history_depth: usize,
    /// If a tier fails during orchestrated startup, abort remaining tiers (§4.7.2).
    pub halt_on_failure: bool,
    /// Cascade a restart to dependents that remained unhealthy (§4.7.4).
    pub dependent_restart: bool,
    /// `health_score` at/below which an agent is considered unhealthy (§4.3).
    pub unhealthy_threshold: u8,
    /// Consecutive unhealthy samples required before transitioning to `Degraded`.
    pub sustained_duration: usize,
    /// Number of samples the health score's weighted moving average considers.
    pub health_score_window: usize,
    /// Grace period before restarting an agent at resource `Critical` severity.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub resource_grace_period: Duration,
    /// When set, two agents sharing a dependency tier may not declare the same
    /// `priority` (§4.1: "no duplicate priorities within a dependency tier cause
    /// an error only when `strict_priorities` is set").
    pub strict_priorities: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            sample_interval: default_sample_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            startup_timeout: default_startup_timeout(),
            max_parallel_spawns: default_max_parallel_spawns(),
            history_depth: DEFAULT_HISTORY_DEPTH,
            halt_on_failure: false,
            dependent_restart: false,
            unhealthy_threshold: crate::health::DEFAULT_UNHEALTHY_THRESHOLD,
            sustained_duration: crate::health::DEFAULT_SUSTAINED_DURATION,
            health_score_window: crate::health::DEFAULT_SCORE_WINDOW,
            resource_grace_period: Duration::from_secs(30),
            strict_priorities: false,
        }
    }
}

/// Immutable per-version description of one supervised agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentDescriptor {
    #[serde(skip)]
    pub name: String,
    pub working_directory: PathBuf,
    pub start_command: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub health_url: Url,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub startup_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration_str::deserialize_option_duration")]
    pub shutdown_timeout: Option<Duration>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_false")]
    pub auto_start: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicyConfig,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

impl AgentDescriptor {
    pub fn health_endpoint(&self) -> Url {
        let mut url = self.health_url.clone();
        let base_path = url.path().trim_end_matches('/');
        let joined = format!("{base_path}{}", self.health_path);
        url.set_path(&joined);
        url
    }

    pub fn effective_startup_timeout(&self, defaults: &Defaults) -> Duration {
        self.startup_timeout.unwrap_or(defaults.startup_timeout)
    }

    pub fn effective_shutdown_timeout(&self, defaults: &Defaults) -> Duration {
        self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout)
    }
}

/// The authoritative fleet description: an ordered mapping of agent name to descriptor,
/// plus a monotone version, an update timestamp and a content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    pub version: u64,
    pub updated_at: SystemTime,
    pub defaults: Defaults,
    pub agents: BTreeMap<String, AgentDescriptor>,
    pub config_hash: String,
}

impl FleetConfig {
    pub fn graph(&self) -> Result<DependencyGraph, DependencyGraphError> {
        let nodes = self
            .agents
            .values()
            .map(|a| GraphNode {
                name: a.name.clone(),
                priority: a.priority,
                dependencies: a.dependencies.clone(),
            })
            .collect();
        DependencyGraph::build(nodes)
    }

    pub fn enabled_auto_start_names(&self) -> HashSet<String> {
        self.agents
            .values()
            .filter(|a| a.enabled && a.auto_start)
            .map(|a| a.name.clone())
            .collect()
    }
}

/// Wire format of the document described in §6; `name` keys become `AgentDescriptor::name`.
#[derive(Debug, Deserialize)]
struct RawDocument {
    version: u64,
    #[serde(default)]
    defaults: Defaults,
    #[serde(default)]
    agents: BTreeMap<String, AgentDescriptor>,
}

/// One field-level change reported by [`ConfigStore::diff`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentChange {
    Added,
    Removed,
    Mutated { fields: Vec<String> },
    Unchanged,
}

/// Fields whose change forces a full restart rather than a hot-apply, per §4.7.6.
const RESTART_TRIGGERING_FIELDS: &[&str] = &["start_command", "working_directory", "environment"];

pub fn restart_required(fields: &[String]) -> bool {
    fields.iter().any(|f| RESTART_TRIGGERING_FIELDS.contains(&f.as_str()))
}

fn diff_descriptor(old: &AgentDescriptor, new: &AgentDescriptor) -> Vec<String> {
    let mut fields = Vec::new();
    if old.start_command != new.start_command {
        fields.push("start_command".to_string());
    }
    if old.working_directory != new.working_directory {
        fields.push("working_directory".to_string());
    }
    if old.environment != new.environment {
        fields.push("environment".to_string());
    }
    if old.health_url != new.health_url || old.health_path != new.health_path {
        fields.push("health_url".to_string());
    }
    if old.startup_timeout != new.startup_timeout {
        fields.push("startup_timeout".to_string());
    }
    if old.shutdown_timeout != new.shutdown_timeout {
        fields.push("shutdown_timeout".to_string());
    }
    if old.enabled != new.enabled {
        fields.push("enabled".to_string());
    }
    if old.auto_start != new.auto_start {
        fields.push("auto_start".to_string());
    }
    if old.priority != new.priority {
        fields.push("priority".to_string());
    }
    if old.dependencies != new.dependencies {
        fields.push("dependencies".to_string());
    }
    if old.restart_policy != new.restart_policy {
        fields.push("restart_policy".to_string());
    }
    fields
}

/// Validates a parsed `FleetConfig`: required fields, dependency references, graph
/// acyclicity. Returns the first error found as a `ConfigError`; never partially
/// applies a config.
fn validate(config: &FleetConfig) -> Result<(), ConfigError> {
    for agent in config.agents.values() {
        if agent.start_command.is_empty() {
            return Err(ConfigError::ValidationError {
                agent: agent.name.clone(),
                field: "start_command".to_string(),
                reason: "must be non-empty".to_string(),
            });
        }
        let startup = agent.startup_timeout.unwrap_or(config.defaults.startup_timeout);
        if startup.is_zero() {
            return Err(ConfigError::ValidationError {
                agent: agent.name.clone(),
                field: "startup_timeout".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let shutdown = agent.shutdown_timeout.unwrap_or(config.defaults.shutdown_timeout);
        if shutdown.is_zero() {
            return Err(ConfigError::ValidationError {
                agent: agent.name.clone(),
                field: "shutdown_timeout".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        for dep in &agent.dependencies {
            let Some(dependency) = config.agents.get(dep) else {
                return Err(ConfigError::ValidationError {
                    agent: agent.name.clone(),
                    field: "dependencies".to_string(),
                    reason: format!("references unknown agent '{dep}'"),
                });
            };
            if !dependency.enabled {
                return Err(ConfigError::ValidationError {
                    agent: agent.name.clone(),
                    field: "dependencies".to_string(),
                    reason: format!("depends on disabled agent '{dep}'"),
                });
            }
        }
        if agent.restart_policy.max_restarts == 0 {
            return Err(ConfigError::ValidationError {
                agent: agent.name.clone(),
                field: "restart_policy.max_restarts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
    }

    let graph = config.graph().map_err(|err| match err {
        DependencyGraphError::UnknownDependency { agent, dependency } => ConfigError::ValidationError {
            agent,
            field: "dependencies".to_string(),
            reason: format!("references unknown agent '{dependency}'"),
        },
        DependencyGraphError::Cycle(cycle) => ConfigError::ValidationError {
            agent: cycle.first().cloned().unwrap_or_default(),
            field: "dependencies".to_string(),
            reason: format!("dependency cycle: {}", cycle.join(" -> ")),
        },
    })?;

    if config.defaults.strict_priorities {
        for tier in graph.start_order() {
            let mut seen = HashSet::new();
            for name in &tier {
                let priority = config.agents[name].priority;
                if !seen.insert(priority) {
                    return Err(ConfigError::ValidationError {
                        agent: name.clone(),
                        field: "priority".to_string(),
                        reason: format!(
                            "duplicate priority {priority} within its dependency tier; \
                             strict_priorities requires distinct priorities per tier"
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

fn canonical_hash(agents: &BTreeMap<String, AgentDescriptor>, version: u64) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    version.hash(&mut hasher);
    for (name, agent) in agents {
        name.hash(&mut hasher);
        agent.start_command.hash(&mut hasher);
        agent.working_directory.hash(&mut hasher);
        agent.health_url.as_str().hash(&mut hasher);
        agent.enabled.hash(&mut hasher);
        agent.auto_start.hash(&mut hasher);
        agent.priority.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Parses and validates raw YAML bytes into a [`FleetConfig`]; never partially applies.
pub fn parse(contents: &str) -> Result<FleetConfig, ConfigError> {
    let raw: RawDocument =
        serde_yaml::from_str(contents).map_err(|err| ConfigError::IOError(err.to_string()))?;
    let agents: BTreeMap<String, AgentDescriptor> = raw
        .agents
        .into_iter()
        .map(|(name, mut descriptor)| {
            descriptor.name = name.clone();
            (name, descriptor)
        })
        .collect();

    let config_hash = canonical_hash(&agents, raw.version);
    let config = FleetConfig {
        version: raw.version,
        updated_at: SystemTime::now(),
        defaults: raw.defaults,
        agents,
        config_hash,
    };
    validate(&config)?;
    Ok(config)
}

/// Observer callback invoked, in version order, after a successful [`ConfigStore::apply`].
pub type ConfigObserver = EventPublisher<FleetConfig>;

/// Holds the active [`FleetConfig`], a bounded version history, and subscriber
/// channels notified (at-least-once, version-ordered) on every successful apply.
pub struct ConfigStore {
    inner: Mutex<ConfigStoreState>,
    history_depth: usize,
}

struct ConfigStoreState {
    active: FleetConfig,
    history: Vec<FleetConfig>,
    subscribers: Vec<EventPublisher<FleetConfig>>,
}

impl ConfigStore {
    /// Loads and validates `path`, seeding the store's active version.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::IOError(format!("{}: {err}", path.display())))?;
        let active = parse(&contents)?;
        let history_depth = active.defaults.history_depth.max(1);
        Ok(Self {
            inner: Mutex::new(ConfigStoreState {
                active,
                history: Vec::new(),
                subscribers: Vec::new(),
            }),
            history_depth,
        })
    }

    pub fn from_config(active: FleetConfig) -> Self {
        let history_depth = active.defaults.history_depth.max(1);
        Self {
            inner: Mutex::new(ConfigStoreState {
                active,
                history: Vec::new(),
                subscribers: Vec::new(),
            }),
            history_depth,
        }
    }

    pub fn active(&self) -> FleetConfig {
        self.inner.lock().unwrap().active.clone()
    }

    /// Atomically swaps the active version after validation, pushing the previous
    /// version into the bounded history and notifying subscribers in version order.
    pub fn apply(&self, new_config: FleetConfig) -> Result<u64, ConfigError> {
        validate(&new_config)?;
        let mut state = self.inner.lock().unwrap();
        if new_config.version <= state.active.version {
            return Err(ConfigError::VersionConflict {
                expected: state.active.version + 1,
                found: new_config.version,
            });
        }
        let previous = std::mem::replace(&mut state.active, new_config.clone());
        state.history.push(previous);
        if state.history.len() > self.history_depth {
            state.history.remove(0);
        }
        for subscriber in &state.subscribers {
            let _ = subscriber.publish(new_config.clone());
        }
        Ok(new_config.version)
    }

    /// Restores a historical version, subject to the same validation as `apply`.
    pub fn rollback(&self, target_version: u64) -> Result<u64, ConfigError> {
        let mut state = self.inner.lock().unwrap();
        let position = state
            .history
            .iter()
            .position(|c| c.version == target_version)
            .ok_or(ConfigError::UnknownVersion(target_version))?;
        let restored = state.history[position].clone();
        validate(&restored)?;

        let previous_active = std::mem::replace(&mut state.active, restored.clone());
        state.history.push(previous_active);
        state.history.retain(|c| c.version != target_version);
        if state.history.len() > self.history_depth {
            state.history.remove(0);
        }
        for subscriber in &state.subscribers {
            let _ = subscriber.publish(restored.clone());
        }
        Ok(restored.version)
    }

    /// Per-agent field-level changes between two fleet versions, used by the manager
    /// to compute the minimal reconciliation plan.
    pub fn diff(old: &FleetConfig, new: &FleetConfig) -> BTreeMap<String, AgentChange> {
        let mut changes = BTreeMap::new();
        for (name, new_agent) in &new.agents {
            match old.agents.get(name) {
                None => {
                    changes.insert(name.clone(), AgentChange::Added);
                }
                Some(old_agent) => {
                    let fields = diff_descriptor(old_agent, new_agent);
                    changes.insert(
                        name.clone(),
                        if fields.is_empty() {
                            AgentChange::Unchanged
                        } else {
                            AgentChange::Mutated { fields }
                        },
                    );
                }
            }
        }
        for name in old.agents.keys() {
            if !new.agents.contains_key(name) {
                changes.insert(name.clone(), AgentChange::Removed);
            }
        }
        changes
    }

    /// Registers a new observer; returns a consumer the caller drains at its own pace.
    /// Delivery is at-least-once and ordered by version, per §4.1.
    pub fn subscribe(&self) -> EventConsumer<FleetConfig> {
        let (publisher, consumer) = pub_sub();
        self.inner.lock().unwrap().subscribers.push(publisher);
        consumer
    }

    pub fn history_versions(&self) -> Vec<u64> {
        self.inner.lock().unwrap().history.iter().map(|c| c.version).collect()
    }
}

pub type SharedConfigStore = Arc<ConfigStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
version: 1
defaults:
  probe_interval: "30s"
  sample_interval: "5s"
  shutdown_timeout: "30s"
  startup_timeout: "60s"
  max_parallel_spawns: 8
  history_depth: 10
agents:
  market-data:
    working_directory: "/tmp"
    start_command: ["market-data-bin"]
    health_url: "http://localhost:9001"
    priority: 10
  pattern-recognition:
    working_directory: "/tmp"
    start_command: ["pattern-bin"]
    health_url: "http://localhost:9002"
    dependencies: ["market-data"]
    priority: 20
"#
    }

    #[test]
    fn parses_a_minimal_document() {
        let config = parse(minimal_yaml()).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents["market-data"].name, "market-data");
        assert_eq!(config.agents["pattern-recognition"].health_path, DEFAULT_HEALTH_PATH);
    }

    #[test]
    fn empty_start_command_is_rejected() {
        let yaml = r#"
version: 1
agents:
  bad:
    working_directory: "/tmp"
    start_command: []
    health_url: "http://localhost:9001"
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "start_command"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let yaml = r#"
version: 1
agents:
  a:
    working_directory: "/tmp"
    start_command: ["x"]
    health_url: "http://localhost:9001"
    dependencies: ["ghost"]
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn duplicate_priority_in_tier_is_rejected_only_when_strict() {
        let yaml = r#"
version: 1
defaults:
  strict_priorities: true
agents:
  a:
    working_directory: "/tmp"
    start_command: ["x"]
    health_url: "http://localhost:9001"
    priority: 10
  b:
    working_directory: "/tmp"
    start_command: ["x"]
    health_url: "http://localhost:9002"
    priority: 10
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "priority"));

        let lenient = yaml.replace("strict_priorities: true", "strict_priorities: false");
        assert!(parse(&lenient).is_ok());
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let yaml = r#"
version: 1
agents:
  a:
    working_directory: "/tmp"
    start_command: ["x"]
    health_url: "http://localhost:9001"
    dependencies: ["b"]
  b:
    working_directory: "/tmp"
    start_command: ["x"]
    health_url: "http://localhost:9002"
    dependencies: ["a"]
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { reason, .. } if reason.contains("cycle")));
    }

    #[test]
    fn apply_bumps_version_and_records_history() {
        let store = ConfigStore::from_config(parse(minimal_yaml()).unwrap());
        let mut next = store.active();
        next.version = 2;
        let applied = store.apply(next).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(store.history_versions(), vec![1]);
    }

    #[test]
    fn apply_rejects_non_increasing_version() {
        let store = ConfigStore::from_config(parse(minimal_yaml()).unwrap());
        let stale = store.active();
        let err = store.apply(stale).unwrap_err();
        assert!(matches!(err, ConfigError::VersionConflict { .. }));
    }

    #[test]
    fn rollback_restores_a_historical_version() {
        let store = ConfigStore::from_config(parse(minimal_yaml()).unwrap());
        let mut v2 = store.active();
        v2.version = 2;
        v2.agents.get_mut("market-data").unwrap().priority = 999;
        store.apply(v2).unwrap();

        let restored = store.rollback(1).unwrap();
        assert_eq!(restored, 1);
        assert_eq!(store.active().agents["market-data"].priority, 10);
    }

    #[test]
    fn rollback_to_unknown_version_errors() {
        let store = ConfigStore::from_config(parse(minimal_yaml()).unwrap());
        assert!(matches!(store.rollback(42), Err(ConfigError::UnknownVersion(42))));
    }

    #[test]
    fn diff_detects_added_removed_and_mutated() {
        let old = parse(minimal_yaml()).unwrap();
        let mut new = old.clone();
        new.agents.remove("pattern-recognition");
        new.agents.get_mut("market-data").unwrap().priority = 50;
        new.agents.insert(
            "risk-management".to_string(),
            new.agents["market-data"].clone(),
        );

        let changes = ConfigStore::diff(&old, &new);
        assert_eq!(changes["pattern-recognition"], AgentChange::Removed);
        assert!(matches!(&changes["market-data"], AgentChange::Mutated { fields } if fields.contains(&"priority".to_string())));
        assert_eq!(changes["risk-management"], AgentChange::Added);
    }

    #[test]
    fn restart_required_flags_only_the_specified_fields() {
        assert!(restart_required(&["start_command".to_string()]));
        assert!(!restart_required(&["priority".to_string()]));
    }

    #[test]
    fn subscribers_are_notified_on_apply() {
        let store = ConfigStore::from_config(parse(minimal_yaml()).unwrap());
        let consumer = store.subscribe();
        let mut next = store.active();
        next.version = 2;
        store.apply(next).unwrap();
        let received = consumer.recv().unwrap();
        assert_eq!(received.version, 2);
    }
}
