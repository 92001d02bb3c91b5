// Provisioner
//
// Pushes the workflow into a running engine via its management interface:
// list (to detect an existing import), import, then activate. Both steps are
// idempotent so a second provision of the same workflow succeeds.

use std::sync::Arc;

use coldstart_core::{ProvisioningError, WorkflowArtifact};
use tracing::{info, warn};

use crate::launcher::ChildProcess;
use crate::management::{CommandOutput, CommandRunner, ManagementCli, ManagementCommand};

/// Output fragments that mean "nothing to do"
const ALREADY_IMPORTED_MARKERS: &[&str] = &["already exists", "duplicate key"];
const ALREADY_ACTIVE_MARKERS: &[&str] = &["already active"];

/// What the import step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    AlreadyPresent,
}

/// Result of a full provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub workflow_id: String,
    pub import: ImportOutcome,
}

/// Imports and activates workflows
#[derive(Clone)]
pub struct Provisioner {
    cli: ManagementCli,
    runner: Arc<dyn CommandRunner>,
}

impl Provisioner {
    pub fn new(cli: ManagementCli, runner: Arc<dyn CommandRunner>) -> Self {
        Self { cli, runner }
    }

    /// Import then activate `workflow` into the engine run by `child`
    pub async fn provision(
        &self,
        child: &ChildProcess,
        workflow: &WorkflowArtifact,
    ) -> Result<ProvisionReport, ProvisioningError> {
        ensure_running(child)?;

        let import = self.import(workflow).await?;
        ensure_running(child)?;
        self.activate(workflow.id()).await?;

        info!(
            workflow_id = %workflow.id(),
            generation = child.generation(),
            import = ?import,
            "Workflow provisioned"
        );

        Ok(ProvisionReport {
            workflow_id: workflow.id().to_string(),
            import,
        })
    }

    /// Import the workflow unless the engine already has it
    pub async fn import(&self, workflow: &WorkflowArtifact) -> Result<ImportOutcome, ProvisioningError> {
        if self.is_present(workflow.id()).await? {
            info!(workflow_id = %workflow.id(), "Workflow already imported, skipping import");
            return Ok(ImportOutcome::AlreadyPresent);
        }

        let command = self.cli.import_workflow(&workflow.path)?;
        let output = self.runner.run(&command).await?;

        if output.is_success() {
            info!(workflow_id = %workflow.id(), path = %workflow.path.display(), "Workflow imported");
            return Ok(ImportOutcome::Imported);
        }
        if mentions_any(&output, ALREADY_IMPORTED_MARKERS) {
            warn!(
                workflow_id = %workflow.id(),
                "Import reported an existing workflow, treating as imported"
            );
            return Ok(ImportOutcome::AlreadyPresent);
        }

        Err(command_failed(&command, &output))
    }

    /// Mark the workflow active
    pub async fn activate(&self, workflow_id: &str) -> Result<(), ProvisioningError> {
        let command = self.cli.activate_workflow(workflow_id)?;
        let output = self.runner.run(&command).await?;

        if output.is_success() || mentions_any(&output, ALREADY_ACTIVE_MARKERS) {
            info!(workflow_id = %workflow_id, "Workflow activated");
            return Ok(());
        }

        Err(command_failed(&command, &output))
    }

    /// Whether `list-workflows` reports `workflow_id`
    pub async fn is_present(&self, workflow_id: &str) -> Result<bool, ProvisioningError> {
        let command = self.cli.list_workflows();
        let output = self.runner.run(&command).await?;

        if !output.is_success() {
            return Err(command_failed(&command, &output));
        }

        let present = parse_workflow_ids(&output.stdout).any(|id| id == workflow_id);
        Ok(present)
    }
}

/// Workflow ids from `list:workflow` output (`<id>|<name>` per line)
fn parse_workflow_ids(stdout: &str) -> impl Iterator<Item = &str> {
    stdout
        .lines()
        .filter_map(|line| line.split('|').next())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn ensure_running(child: &ChildProcess) -> Result<(), ProvisioningError> {
    if child.is_alive() {
        Ok(())
    } else {
        Err(ProvisioningError::EngineNotRunning {
            generation: child.generation(),
        })
    }
}

fn mentions_any(output: &CommandOutput, markers: &[&str]) -> bool {
    markers.iter().any(|marker| output.mentions(marker))
}

fn command_failed(command: &ManagementCommand, output: &CommandOutput) -> ProvisioningError {
    ProvisioningError::CommandFailed {
        command: command.to_string(),
        status: output.status_label(),
        output: output.combined(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use coldstart_core::ProvisioningError;

    use crate::management::{CommandOutput, CommandRunner, ManagementCommand, ManagementOperation};

    /// In-memory engine catalog that behaves like the management CLI
    #[derive(Default)]
    pub struct FakeEngineCli {
        /// workflow id -> active
        pub workflows: Mutex<BTreeMap<String, bool>>,
        pub calls: Mutex<Vec<ManagementOperation>>,
        pub fail_import: bool,
        pub fail_activate: bool,
    }

    impl FakeEngineCli {
        pub fn calls(&self) -> Vec<ManagementOperation> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&ManagementOperation) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|op| pred(*op)).count()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeEngineCli {
        async fn run(&self, command: &ManagementCommand) -> Result<CommandOutput, ProvisioningError> {
            self.calls.lock().unwrap().push(command.operation.clone());
            let mut workflows = self.workflows.lock().unwrap();

            let output = match &command.operation {
                ManagementOperation::ListWorkflows => {
                    let listing: String = workflows
                        .keys()
                        .map(|id| format!("{id}|Workflow {id}\n"))
                        .collect();
                    CommandOutput::success(listing)
                }
                ManagementOperation::ImportWorkflow { path } => {
                    if self.fail_import {
                        CommandOutput::failure(1, "Error: invalid workflow file")
                    } else {
                        let id = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or_default()
                            .to_string();
                        workflows.entry(id).or_insert(false);
                        CommandOutput::success("Successfully imported 1 workflow.")
                    }
                }
                ManagementOperation::ActivateWorkflow { id, active } => {
                    if self.fail_activate {
                        CommandOutput::failure(1, "Error: could not activate")
                    } else {
                        match workflows.get_mut(id) {
                            Some(state) => {
                                *state = *active;
                                CommandOutput::success("Activated workflow")
                            }
                            None => CommandOutput::failure(1, format!("Workflow {id} not found")),
                        }
                    }
                }
            };
            Ok(output)
        }
    }
}
