//! Crate-wide error taxonomy: one `thiserror` enum per subsystem, aggregated behind
//! [`AgentControlError`] at the manager boundary.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("validation failed for agent '{agent}', field '{field}': {reason}")]
    ValidationError {
        agent: String,
        field: String,
        reason: String,
    },
    #[error("configuration source could not be read: {0}")]
    IOError(String),
    #[error("concurrent apply detected: expected version {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("no configuration version {0} in history")]
    UnknownVersion(u64),
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum SpawnError {
    #[error("binary not found: {0}")]
    BinaryNotFound(String),
    #[error("permission denied spawning: {0}")]
    PermissionDenied(String),
    #[error("working directory missing: {0}")]
    WorkingDirectoryMissing(String),
    #[error("spawn failed: {0}")]
    Other(String),
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum HealthError {
    #[error("agent unreachable: {0}")]
    Unreachable(String),
    #[error("invalid health response: {0}")]
    InvalidResponse(String),
    #[error("health probe timed out")]
    Timeout,
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum LifecycleError {
    #[error("agent '{0}' is already running")]
    AlreadyRunning(String),
    #[error("agent '{0}' is not running")]
    NotRunning(String),
    #[error("agent '{0}' is disabled")]
    Disabled(String),
    #[error("agent '{0}' is in state {1:?}, which does not permit this operation")]
    StateConflict(String, crate::agent::LifecycleState),
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ResourceError {
    #[error("resource limit exceeded: {kind:?} at severity {severity:?}")]
    LimitExceeded {
        kind: crate::resource::ResourceLimitKind,
        severity: crate::resource::Severity,
    },
}

#[derive(Debug, Error)]
pub enum AgentControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Aggregates per-agent failures encountered while acting on multiple agents at once
/// (e.g. `start_all`/`stop_all`), so a caller can see every failure, not just the first.
#[derive(Debug)]
pub struct FleetOperationErrors(pub Vec<(String, AgentControlError)>);

impl std::fmt::Display for FleetOperationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(agent, err)| format!("{agent}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{joined}")
    }
}

impl std::error::Error for FleetOperationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_agent_control_error() {
        let err: AgentControlError = ConfigError::IOError("missing file".into()).into();
        assert!(err.to_string().contains("missing file"));
    }

    #[test]
    fn fleet_operation_errors_joins_messages() {
        let errors = FleetOperationErrors(vec![
            ("a".into(), LifecycleError::UnknownAgent("a".into()).into()),
            ("b".into(), LifecycleError::AlreadyRunning("b".into()).into()),
        ]);
        let msg = errors.to_string();
        assert!(msg.contains("a: unknown agent"));
        assert!(msg.contains("b: agent 'b' is already running"));
    }
}
