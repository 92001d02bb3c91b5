// Management interface
//
// The engine exposes list/import/activate through its CLI. Commands are built
// as discrete argument lists and executed through the CommandRunner trait, so
// no value ever passes through a shell and tests can substitute the runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use coldstart_core::{EngineConfig, ProvisioningError};
use tokio::process::Command;
use tracing::debug;

/// Typed management operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementOperation {
    ListWorkflows,
    ImportWorkflow { path: PathBuf },
    ActivateWorkflow { id: String, active: bool },
}

/// A fully built management command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub operation: ManagementOperation,
}

impl fmt::Display for ManagementCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds management commands for one engine installation
#[derive(Debug, Clone)]
pub struct ManagementCli {
    program: String,
    env: Vec<(String, String)>,
}

impl ManagementCli {
    pub fn new(program: impl Into<String>, env: Vec<(String, String)>) -> Self {
        Self {
            program: program.into(),
            env,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.management_command.clone(), config.environment_overlay())
    }

    pub fn list_workflows(&self) -> ManagementCommand {
        self.build(ManagementOperation::ListWorkflows, vec!["list:workflow".to_string()])
    }

    pub fn import_workflow(&self, path: &Path) -> Result<ManagementCommand, ProvisioningError> {
        let rendered = path
            .to_str()
            .ok_or_else(|| {
                ProvisioningError::InvalidArgument(format!(
                    "workflow path is not valid UTF-8: {}",
                    path.display()
                ))
            })?
            .to_string();
        check_argument("workflow path", &rendered)?;

        Ok(self.build(
            ManagementOperation::ImportWorkflow {
                path: path.to_path_buf(),
            },
            vec!["import:workflow".to_string(), format!("--input={rendered}")],
        ))
    }

    pub fn activate_workflow(&self, id: &str) -> Result<ManagementCommand, ProvisioningError> {
        check_argument("workflow id", id)?;

        Ok(self.build(
            ManagementOperation::ActivateWorkflow {
                id: id.to_string(),
                active: true,
            },
            vec![
                "update:workflow".to_string(),
                format!("--id={id}"),
                "--active=true".to_string(),
            ],
        ))
    }

    fn build(&self, operation: ManagementOperation, args: Vec<String>) -> ManagementCommand {
        ManagementCommand {
            program: self.program.clone(),
            args,
            env: self.env.clone(),
            operation,
        }
    }
}

fn check_argument(label: &str, value: &str) -> Result<(), ProvisioningError> {
    if value.trim().is_empty() {
        return Err(ProvisioningError::InvalidArgument(format!("{label} is empty")));
    }
    if value.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
        return Err(ProvisioningError::InvalidArgument(format!(
            "{label} contains control characters"
        )));
    }
    Ok(())
}

/// Captured result of a management command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Case-insensitive search over stdout and stderr
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.stdout.to_lowercase().contains(&needle) || self.stderr.to_lowercase().contains(&needle)
    }

    /// Combined, trimmed output for error messages
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    pub fn status_label(&self) -> String {
        match self.status {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_string(),
        }
    }
}

/// Executes management commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion
    ///
    /// A non-zero exit is returned as output, not as an error; only failing to
    /// run the command at all is an error.
    async fn run(&self, command: &ManagementCommand) -> Result<CommandOutput, ProvisioningError>;
}

/// Runs commands as real subprocesses
#[derive(Debug, Clone)]
pub struct ProcessCommandRunner {
    timeout: Duration,
}

impl ProcessCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, command: &ManagementCommand) -> Result<CommandOutput, ProvisioningError> {
        debug!(command = %command, "Running management command");

        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProvisioningError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProvisioningError::TimedOut {
                command: command.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|source| ProvisioningError::Spawn {
                command: command.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
