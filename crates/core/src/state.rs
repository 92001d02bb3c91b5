// Service lifecycle state
//
// One value per execution environment. Only the lifecycle controller writes it;
// everyone else observes it through a watch channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the supervised engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// No child has been launched in this environment
    #[default]
    NotStarted,
    /// A child is booting and being probed
    Starting,
    /// First generation is healthy and waiting for import + activate
    ProvisioningPending,
    /// Provisioned child is being replaced by a fresh generation
    Restarting,
    /// Provisioned generation is healthy and accepting traffic
    Ready,
    /// Bring-up aborted; no automatic recovery within the invocation
    Failed,
}

impl ServiceState {
    /// A new child may only be launched from these states
    pub fn can_launch(self) -> bool {
        matches!(self, ServiceState::NotStarted | ServiceState::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Failed, Starting)
                | (Starting, ProvisioningPending)
                | (Starting, Ready)
                | (Starting, Failed)
                | (ProvisioningPending, Restarting)
                | (ProvisioningPending, Failed)
                | (Restarting, Starting)
                | (Restarting, Failed)
                | (Ready, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::NotStarted => "not_started",
            ServiceState::Starting => "starting",
            ServiceState::ProvisioningPending => "provisioning_pending",
            ServiceState::Restarting => "restarting",
            ServiceState::Ready => "ready",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
