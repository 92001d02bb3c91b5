// Supervisor configuration
//
// Loaded from environment variables with defaults matching a stock engine
// image. `from_env` never fails; `validate` reports unusable combinations.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::invocation::DEFAULT_PROMPT;

/// Environment keys understood by the wrapped engine
pub mod engine_env {
    /// Working-directory override
    pub const USER_FOLDER: &str = "N8N_USER_FOLDER";
    /// Settings-file permission enforcement toggle
    pub const ENFORCE_SETTINGS_FILE_PERMISSIONS: &str = "N8N_ENFORCE_SETTINGS_FILE_PERMISSIONS";
    /// Headless / no-UI toggle
    pub const DISABLE_UI: &str = "N8N_DISABLE_UI";
    /// Task runner toggle
    pub const RUNNERS_ENABLED: &str = "N8N_RUNNERS_ENABLED";
    pub const HOST: &str = "N8N_HOST";
    pub const PORT: &str = "N8N_PORT";
    pub const PROTOCOL: &str = "N8N_PROTOCOL";
}

/// How the inbound event is turned into the forwarded body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// `{"prompt": <extracted prompt>}`
    #[default]
    Prompt,
    /// The full inbound event, verbatim
    Passthrough,
}

impl FromStr for PayloadMode {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "prompt" => Ok(PayloadMode::Prompt),
            "passthrough" | "pass_through" | "event" => Ok(PayloadMode::Passthrough),
            other => Err(SupervisorError::config(format!(
                "unknown payload mode: {other}"
            ))),
        }
    }
}

/// How to launch and address the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server executable
    pub command: String,
    /// Arguments for the server executable
    pub args: Vec<String>,
    /// Executable for management commands (list/import/activate)
    pub management_command: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    /// Engine working state; wiped once per cold boot
    pub data_dir: PathBuf,
    /// How long `stop` waits for the process to exit
    pub stop_grace: Duration,
    /// Upper bound for a single management command
    pub management_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "n8n".to_string(),
            args: vec!["start".to_string()],
            management_command: "n8n".to_string(),
            host: "localhost".to_string(),
            port: 5678,
            protocol: "http".to_string(),
            data_dir: PathBuf::from("/tmp/.n8n"),
            stop_grace: Duration::from_secs(10),
            management_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Base URL of the engine, e.g. `http://localhost:5678`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Variables layered over the ambient environment of every engine process
    pub fn environment_overlay(&self) -> Vec<(String, String)> {
        vec![
            (
                engine_env::USER_FOLDER.to_string(),
                self.data_dir.display().to_string(),
            ),
            (
                engine_env::ENFORCE_SETTINGS_FILE_PERMISSIONS.to_string(),
                "false".to_string(),
            ),
            (engine_env::DISABLE_UI.to_string(), "true".to_string()),
            (engine_env::RUNNERS_ENABLED.to_string(), "true".to_string()),
            (engine_env::HOST.to_string(), self.host.clone()),
            (engine_env::PORT.to_string(), self.port.to_string()),
            (engine_env::PROTOCOL.to_string(), self.protocol.clone()),
        ]
    }
}

/// Health polling parameters
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub path: String,
    /// Total budget for one wait
    pub timeout: Duration,
    /// Delay between probes
    pub interval: Duration,
    /// Upper bound for a single probe
    pub probe_timeout: Duration,
    /// JSON field inspected when the body is JSON
    pub ready_field: String,
    /// Accepted values of `ready_field`
    pub ready_values: Vec<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/healthz".to_string(),
            timeout: Duration::from_secs(180),
            interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            ready_field: "status".to_string(),
            ready_values: vec!["ok".to_string(), "ready".to_string()],
        }
    }
}

/// Grace periods around the restart cycle
///
/// These absorb asynchronous route registration in the engine. They are
/// heuristics, not a readiness contract.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Wait after relaunching before re-probing health
    pub restart_settle: Duration,
    /// Wait after reaching Ready before accepting traffic
    pub ready_settle: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_settle: Duration::from_secs(3),
            ready_settle: Duration::from_secs(2),
        }
    }
}

/// Request forwarding parameters
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Candidate routes, highest priority first
    pub routes: Vec<String>,
    pub request_timeout: Duration,
    pub default_prompt: String,
    pub payload_mode: PayloadMode,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            routes: vec!["/webhook/echo".to_string(), "/webhook-test/echo".to_string()],
            request_timeout: Duration::from_secs(30),
            default_prompt: DEFAULT_PROMPT.to_string(),
            payload_mode: PayloadMode::Prompt,
        }
    }
}

/// Complete supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub engine: EngineConfig,
    pub health: HealthConfig,
    pub lifecycle: LifecycleConfig,
    pub forward: ForwardConfig,
    /// Workflow artifact imported into every provisioned generation
    pub workflow_path: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            health: HealthConfig::default(),
            lifecycle: LifecycleConfig::default(),
            forward: ForwardConfig::default(),
            workflow_path: PathBuf::from("/opt/echo-updated.json"),
        }
    }
}

impl SupervisorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `ENGINE_COMMAND`, `ENGINE_ARGS`, `ENGINE_MANAGEMENT_COMMAND`
    /// - `ENGINE_HOST`, `ENGINE_PORT`, `ENGINE_PROTOCOL`, `ENGINE_DATA_DIR`
    /// - `ENGINE_STOP_GRACE_SECS`, `MANAGEMENT_TIMEOUT_SECS`
    /// - `HEALTH_PATH`, `HEALTH_TIMEOUT_SECS`, `HEALTH_INTERVAL_MS`, `HEALTH_PROBE_TIMEOUT_MS`
    /// - `HEALTH_READY_FIELD`, `HEALTH_READY_VALUES` (comma separated)
    /// - `RESTART_SETTLE_SECS`, `READY_SETTLE_SECS`
    /// - `FORWARD_ROUTES` (comma separated), `FORWARD_TIMEOUT_SECS`
    /// - `DEFAULT_PROMPT`, `PAYLOAD_MODE` (`prompt` or `passthrough`)
    /// - `WORKFLOW_PATH`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_or = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let command = get("ENGINE_COMMAND").unwrap_or(defaults.engine.command);
        let management_command =
            get("ENGINE_MANAGEMENT_COMMAND").unwrap_or_else(|| command.clone());

        let engine = EngineConfig {
            args: get("ENGINE_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.engine.args),
            host: get("ENGINE_HOST").unwrap_or(defaults.engine.host),
            port: get("ENGINE_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.engine.port),
            protocol: get("ENGINE_PROTOCOL").unwrap_or(defaults.engine.protocol),
            data_dir: get("ENGINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.engine.data_dir),
            stop_grace: Duration::from_secs(parse_or(
                "ENGINE_STOP_GRACE_SECS",
                defaults.engine.stop_grace.as_secs(),
            )),
            management_timeout: Duration::from_secs(parse_or(
                "MANAGEMENT_TIMEOUT_SECS",
                defaults.engine.management_timeout.as_secs(),
            )),
            command,
            management_command,
        };

        let health = HealthConfig {
            path: get("HEALTH_PATH").unwrap_or(defaults.health.path),
            timeout: Duration::from_secs(parse_or(
                "HEALTH_TIMEOUT_SECS",
                defaults.health.timeout.as_secs(),
            )),
            interval: Duration::from_millis(parse_or(
                "HEALTH_INTERVAL_MS",
                defaults.health.interval.as_millis() as u64,
            )),
            probe_timeout: Duration::from_millis(parse_or(
                "HEALTH_PROBE_TIMEOUT_MS",
                defaults.health.probe_timeout.as_millis() as u64,
            )),
            ready_field: get("HEALTH_READY_FIELD").unwrap_or(defaults.health.ready_field),
            ready_values: get("HEALTH_READY_VALUES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.health.ready_values),
        };

        let lifecycle = LifecycleConfig {
            restart_settle: Duration::from_secs(parse_or(
                "RESTART_SETTLE_SECS",
                defaults.lifecycle.restart_settle.as_secs(),
            )),
            ready_settle: Duration::from_secs(parse_or(
                "READY_SETTLE_SECS",
                defaults.lifecycle.ready_settle.as_secs(),
            )),
        };

        let payload_mode = match get("PAYLOAD_MODE").map(|v| v.parse::<PayloadMode>()) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ignoring PAYLOAD_MODE, using default");
                defaults.forward.payload_mode
            }
            None => defaults.forward.payload_mode,
        };

        let forward = ForwardConfig {
            routes: get("FORWARD_ROUTES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.forward.routes),
            request_timeout: Duration::from_secs(parse_or(
                "FORWARD_TIMEOUT_SECS",
                defaults.forward.request_timeout.as_secs(),
            )),
            default_prompt: get("DEFAULT_PROMPT").unwrap_or(defaults.forward.default_prompt),
            payload_mode,
        };

        Self {
            engine,
            health,
            lifecycle,
            forward,
            workflow_path: get("WORKFLOW_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.workflow_path),
        }
    }

    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.command.trim().is_empty() {
            return Err(SupervisorError::config("engine command is empty"));
        }
        if self.engine.port == 0 {
            return Err(SupervisorError::config("engine port must be non-zero"));
        }
        if self.forward.routes.is_empty() {
            return Err(SupervisorError::config("at least one forward route is required"));
        }
        if let Some(route) = self.forward.routes.iter().find(|r| !r.starts_with('/')) {
            return Err(SupervisorError::config(format!(
                "forward route must start with '/': {route}"
            )));
        }
        if !self.health.path.starts_with('/') {
            return Err(SupervisorError::config("health path must start with '/'"));
        }
        if self.health.interval.is_zero() {
            return Err(SupervisorError::config("health interval must be non-zero"));
        }
        if self.engine.data_dir.parent().is_none() {
            return Err(SupervisorError::config(
                "data directory must not be the filesystem root",
            ));
        }
        Ok(())
    }

    /// Full URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!("{}{}", self.engine.base_url(), self.health.path)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> SupervisorConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SupervisorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]);
        assert_eq!(config.engine.command, "n8n");
        assert_eq!(config.engine.args, vec!["start"]);
        assert_eq!(config.engine.management_command, "n8n");
        assert_eq!(config.health_url(), "http://localhost:5678/healthz");
        assert_eq!(config.health.timeout, Duration::from_secs(180));
        assert_eq!(config.health.interval, Duration::from_secs(1));
        assert_eq!(config.forward.routes[0], "/webhook/echo");
        assert_eq!(config.forward.payload_mode, PayloadMode::Prompt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("ENGINE_COMMAND", "/usr/local/bin/engine"),
            ("ENGINE_ARGS", "serve --verbose"),
            ("ENGINE_PORT", "6000"),
            ("HEALTH_INTERVAL_MS", "250"),
            ("FORWARD_ROUTES", " /a , /b ,, /c"),
            ("PAYLOAD_MODE", "passthrough"),
            ("RESTART_SETTLE_SECS", "0"),
        ]);
        assert_eq!(config.engine.command, "/usr/local/bin/engine");
        assert_eq!(config.engine.management_command, "/usr/local/bin/engine");
        assert_eq!(config.engine.args, vec!["serve", "--verbose"]);
        assert_eq!(config.engine.port, 6000);
        assert_eq!(config.health.interval, Duration::from_millis(250));
        assert_eq!(config.forward.routes, vec!["/a", "/b", "/c"]);
        assert_eq!(config.forward.payload_mode, PayloadMode::Passthrough);
        assert!(config.lifecycle.restart_settle.is_zero());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from_map(&[("ENGINE_PORT", "not-a-port"), ("PAYLOAD_MODE", "bogus")]);
        assert_eq!(config.engine.port, 5678);
        assert_eq!(config.forward.payload_mode, PayloadMode::Prompt);
    }

    #[test]
    fn test_environment_overlay_keys() {
        let config = from_map(&[("ENGINE_DATA_DIR", "/tmp/engine-data")]);
        let overlay: HashMap<_, _> = config.engine.environment_overlay().into_iter().collect();
        assert_eq!(overlay[engine_env::USER_FOLDER], "/tmp/engine-data");
        assert_eq!(overlay[engine_env::DISABLE_UI], "true");
        assert_eq!(overlay[engine_env::RUNNERS_ENABLED], "true");
        assert_eq!(overlay[engine_env::ENFORCE_SETTINGS_FILE_PERMISSIONS], "false");
        assert_eq!(overlay[engine_env::PORT], "5678");
    }

    #[test]
    fn test_validate_rejects_bad_routes() {
        let mut config = SupervisorConfig::default();
        config.forward.routes = vec![];
        assert!(config.validate().is_err());

        config.forward.routes = vec!["webhook/echo".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_root_data_dir() {
        let mut config = SupervisorConfig::default();
        config.engine.data_dir = PathBuf::from("/");
        assert!(config.validate().is_err());
    }
}
