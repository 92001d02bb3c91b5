// Coldstart Core
//
// Shared types for supervising an engine process inside a short-lived
// execution environment.
//
// Key design decisions:
// - ServiceState is a plain enum; only the lifecycle controller mutates it
// - Inbound events are classified into an InboundPayload sum type and a
//   PromptPolicy decides the forwarded prompt in a fixed order
// - Every failure has a SupervisorError variant with a stable `kind()` tag
// - Configuration comes from the environment and never panics on bad input

pub mod config;
pub mod error;
pub mod invocation;
pub mod state;
pub mod telemetry;
pub mod workflow;

// Re-exports for convenience
pub use config::{
    EngineConfig, ForwardConfig, HealthConfig, LifecycleConfig, PayloadMode, SupervisorConfig,
};
pub use error::{ProvisioningError, Result, SupervisorError, WorkflowError};
pub use invocation::{
    ExtractedPrompt, InboundPayload, InvocationEvent, InvocationResponse, PromptPolicy,
    PromptSource, DEFAULT_PROMPT,
};
pub use state::ServiceState;
pub use workflow::{WorkflowArtifact, WorkflowDescriptor, WorkflowNode};
