// Coldstart Supervisor
//
// Boots a wrapped engine as a child process, waits for health, provisions a
// workflow through the engine's management CLI, restarts it once so the
// workflow's routes register, then forwards invocations to it.
//
// Key design decisions:
// - LifecycleController owns the only child handle and the service state
// - Health probing, provisioning, and forwarding receive references, never ownership
// - Management commands are argument lists run through the CommandRunner trait
// - Supervisor serialises bring-up behind one lock and forwards outside it

pub mod forwarder;
pub mod health;
pub mod launcher;
pub mod lifecycle;
pub mod management;
pub mod provisioner;
pub mod supervisor;

pub use forwarder::{ForwardOutcome, ForwardRequest, ForwardResponse, RequestForwarder, RouteAttempt};
pub use health::{HealthCheckResult, HealthProber, HealthReport, ReadinessPredicate};
pub use launcher::{ChildProcess, ExitInfo, LaunchSpec, ProcessLauncher};
pub use lifecycle::{LifecycleController, ReadyOutcome};
pub use management::{
    CommandOutput, CommandRunner, ManagementCli, ManagementCommand, ManagementOperation,
    ProcessCommandRunner,
};
pub use provisioner::{ImportOutcome, ProvisionReport, Provisioner};
pub use supervisor::{Supervisor, INVOCATION_ID_HEADER};

/// HTTP client for the engine's local port
///
/// Proxy settings from the environment must not apply to localhost traffic.
pub(crate) fn local_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
