// Error taxonomy for the engine supervisor
//
// Startup and health-timeout errors abort the current generation. Provisioning
// errors abort too, but are converted into a structured response at the
// invocation boundary. Forward errors are only raised once every candidate
// route has been tried.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while supervising the wrapped engine
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Process failed to spawn or exited before becoming healthy
    #[error("engine generation {generation} failed to start: {reason}")]
    Startup { generation: u32, reason: String },

    /// Health endpoint never reported ready within the budget
    #[error("engine did not become healthy after {attempts} attempts ({elapsed:?} elapsed)")]
    HealthTimeout { attempts: u32, elapsed: Duration },

    /// Import or activation of the workflow failed
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// All candidate routes failed, or the engine was not ready
    #[error("forwarding failed: {0}")]
    Forward(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Workflow artifact could not be loaded
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

impl SupervisorError {
    /// Create a startup error
    pub fn startup(generation: u32, reason: impl Into<String>) -> Self {
        SupervisorError::Startup {
            generation,
            reason: reason.into(),
        }
    }

    /// Create a forward error
    pub fn forward(msg: impl Into<String>) -> Self {
        SupervisorError::Forward(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        SupervisorError::Configuration(msg.into())
    }

    /// Stable tag used in response bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Startup { .. } => "startup_error",
            SupervisorError::HealthTimeout { .. } => "health_timeout_error",
            SupervisorError::Provisioning(_) => "provisioning_error",
            SupervisorError::Forward(_) => "forward_error",
            SupervisorError::Configuration(_) => "configuration_error",
            SupervisorError::Workflow(_) => "workflow_error",
        }
    }
}

/// Errors raised by the management interface (list/import/activate)
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Management command could not be spawned
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Management command did not finish in time
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    /// Management command exited unsuccessfully
    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    /// The engine process is not running
    #[error("engine generation {generation} is not running")]
    EngineNotRunning { generation: u32 },

    /// An argument was rejected by the command builder
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Workflow artifact could not be staged into the data directory
    #[error("failed to stage workflow at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading a workflow artifact
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid workflow: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(SupervisorError::startup(1, "boom").kind(), "startup_error");
        assert_eq!(
            SupervisorError::HealthTimeout {
                attempts: 3,
                elapsed: Duration::from_secs(3)
            }
            .kind(),
            "health_timeout_error"
        );
        assert_eq!(
            SupervisorError::from(ProvisioningError::EngineNotRunning { generation: 1 }).kind(),
            "provisioning_error"
        );
        assert_eq!(SupervisorError::forward("x").kind(), "forward_error");
    }

    #[test]
    fn test_health_timeout_message_carries_attempts() {
        let err = SupervisorError::HealthTimeout {
            attempts: 7,
            elapsed: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("7 attempts"));
    }
}
