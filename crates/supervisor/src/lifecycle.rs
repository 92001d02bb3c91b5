// Lifecycle controller
//
// Owns the single child handle and the service state. Drives the boot sequence
//
//   Starting -> ProvisioningPending -> Restarting -> Starting -> Ready
//
// exactly once per warm instance and reuses a Ready engine afterwards. Any
// failure stops the child and parks the state in Failed; the next call to
// `ensure_ready` starts a fresh bring-up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use coldstart_core::{ServiceState, SupervisorConfig, SupervisorError, WorkflowArtifact};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::health::{HealthProber, HealthReport};
use crate::launcher::{ChildProcess, LaunchSpec, ProcessLauncher};
use crate::management::{CommandRunner, ManagementCli};
use crate::provisioner::Provisioner;

/// How `ensure_ready` reached Ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The running generation was already Ready
    Reused { generation: u32 },
    /// A full boot/provision/restart cycle ran
    ColdStarted { generation: u32, elapsed: Duration },
}

impl ReadyOutcome {
    pub fn generation(&self) -> u32 {
        match self {
            ReadyOutcome::Reused { generation } | ReadyOutcome::ColdStarted { generation, .. } => {
                *generation
            }
        }
    }

    pub fn is_cold(&self) -> bool {
        matches!(self, ReadyOutcome::ColdStarted { .. })
    }
}

/// Drives the engine from NotStarted to Ready
pub struct LifecycleController {
    config: Arc<SupervisorConfig>,
    launcher: ProcessLauncher,
    prober: HealthProber,
    provisioner: Provisioner,
    state_tx: watch::Sender<ServiceState>,
    generation: u32,
    child: Option<ChildProcess>,
    data_dir_prepared: bool,
}

impl LifecycleController {
    pub fn new(config: Arc<SupervisorConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        let launcher = ProcessLauncher::from_config(&config.engine);
        let prober = HealthProber::from_config(&config.health);
        let provisioner = Provisioner::new(ManagementCli::from_config(&config.engine), runner);
        let (state_tx, _) = watch::channel(ServiceState::NotStarted);

        Self {
            config,
            launcher,
            prober,
            provisioner,
            state_tx,
            generation: 0,
            child: None,
            data_dir_prepared: false,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Observe state changes without access to the controller
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Generation of the most recently launched child (0 before the first launch)
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_child_alive(&self) -> bool {
        self.child.as_ref().is_some_and(ChildProcess::is_alive)
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(ChildProcess::pid)
    }

    /// Bring the engine to Ready, or reuse it if it already is
    pub async fn ensure_ready(&mut self) -> Result<ReadyOutcome, SupervisorError> {
        match self.state() {
            ServiceState::Ready if self.is_child_alive() => {
                return Ok(ReadyOutcome::Reused {
                    generation: self.generation,
                });
            }
            ServiceState::Ready => {
                let exit = self.child.as_ref().and_then(ChildProcess::exit_info);
                warn!(
                    generation = self.generation,
                    exit = ?exit,
                    "Ready engine is no longer running, starting a new generation"
                );
                self.launcher.stop(&mut self.child).await;
                self.transition(ServiceState::Failed);
            }
            state if !state.can_launch() => {
                // A previous bring-up was dropped mid-flight
                warn!(state = %state, "Abandoning interrupted bring-up");
                self.launcher.stop(&mut self.child).await;
                self.transition(ServiceState::Failed);
            }
            _ => {}
        }

        let started = Instant::now();
        match self.bring_up().await {
            Ok(()) => Ok(ReadyOutcome::ColdStarted {
                generation: self.generation,
                elapsed: started.elapsed(),
            }),
            Err(e) => {
                error!(
                    generation = self.generation,
                    state = %self.state(),
                    error = %e,
                    error_type = e.kind(),
                    "Engine bring-up failed"
                );
                self.launcher.stop(&mut self.child).await;
                self.transition(ServiceState::Failed);
                Err(e)
            }
        }
    }

    /// Stop the child; state is left as is
    pub async fn shutdown(&mut self) {
        info!(generation = self.generation, state = %self.state(), "Shutting down engine");
        self.launcher.stop(&mut self.child).await;
    }

    async fn bring_up(&mut self) -> Result<(), SupervisorError> {
        self.transition(ServiceState::Starting);

        if !self.data_dir_prepared {
            self.launcher.reset_data_dir().await?;
            self.data_dir_prepared = true;
        }

        let artifact = WorkflowArtifact::load(&self.config.workflow_path).await?;
        log_webhook_routes(&artifact, &self.config.forward.routes);

        // First generation: boot, then import + activate
        self.launch_and_wait(Duration::ZERO).await?;
        self.transition(ServiceState::ProvisioningPending);

        let staged = artifact.stage(self.launcher.data_dir()).await?;
        let child = self
            .child
            .as_ref()
            .ok_or_else(|| SupervisorError::startup(self.generation, "engine handle missing"))?;
        self.provisioner.provision(child, &staged).await?;

        // Second generation picks up the provisioned workflow
        self.transition(ServiceState::Restarting);
        self.launcher.stop(&mut self.child).await;
        self.transition(ServiceState::Starting);
        self.launch_and_wait(self.config.lifecycle.restart_settle)
            .await?;

        self.transition(ServiceState::Ready);
        self.settle_ready().await
    }

    /// Hold traffic back for `ready_settle`, failing if the engine dies meanwhile
    async fn settle_ready(&self) -> Result<(), SupervisorError> {
        let settle = self.config.lifecycle.ready_settle;
        if settle.is_zero() {
            return Ok(());
        }
        let child = self
            .child
            .as_ref()
            .ok_or_else(|| SupervisorError::startup(self.generation, "engine handle missing"))?;

        tokio::select! {
            _ = tokio::time::sleep(settle) => Ok(()),
            exit = child.exited() => Err(SupervisorError::startup(
                self.generation,
                format!("engine exited while settling after becoming healthy ({exit})"),
            )),
        }
    }

    /// Launch the next generation and wait for health, or for it to die
    async fn launch_and_wait(&mut self, settle: Duration) -> Result<HealthReport, SupervisorError> {
        self.generation += 1;
        let generation = self.generation;
        let child = self
            .launcher
            .start(&LaunchSpec::for_engine(&self.config.engine), generation)?;

        let url = self.config.health_url();
        let budget = self.config.health.timeout;
        let prober = &self.prober;
        let wait = async {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            prober.wait_until_healthy(&url, budget).await
        };

        let result = tokio::select! {
            report = wait => report,
            exit = child.exited() => Err(SupervisorError::startup(
                generation,
                format!("engine exited before becoming healthy ({exit})"),
            )),
        };

        self.child = Some(child);
        result
    }

    fn transition(&mut self, next: ServiceState) {
        let from = self.state();
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!(from = %from, to = %next, "Unexpected state transition");
        }
        self.state_tx.send_replace(next);
        info!(from = %from, to = %next, generation = self.generation, "Service state changed");
    }
}

fn log_webhook_routes(artifact: &WorkflowArtifact, routes: &[String]) {
    let webhooks = artifact.descriptor.webhook_paths();
    let matched: Vec<&str> = routes
        .iter()
        .filter(|route| {
            let last = route.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
            webhooks.iter().any(|path| path.trim_matches('/') == last)
        })
        .map(String::as_str)
        .collect();

    if matched.is_empty() {
        warn!(
            workflow_id = %artifact.id(),
            webhooks = ?webhooks,
            routes = ?routes,
            "No forward route matches a webhook in the workflow"
        );
    } else {
        info!(
            workflow_id = %artifact.id(),
            webhooks = ?webhooks,
            routes = ?matched,
            "Workflow webhooks cover forward routes"
        );
    }
}
