// Supervisor facade
//
// The invocation entrypoint. Wraps the lifecycle controller in a single-flight
// lock so concurrent invocations share one bring-up, then forwards outside the
// lock. `invoke` never returns an error; every failure becomes a response.

use std::sync::Arc;

use coldstart_core::{
    InvocationEvent, InvocationResponse, PayloadMode, PromptPolicy, ServiceState,
    SupervisorConfig, SupervisorError,
};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::forwarder::{ForwardOutcome, ForwardRequest, RequestForwarder};
use crate::lifecycle::{LifecycleController, ReadyOutcome};
use crate::management::{CommandRunner, ProcessCommandRunner};

/// Header carrying the invocation id to the engine
pub const INVOCATION_ID_HEADER: &str = "x-coldstart-invocation-id";

const STARTUP_FAILED_MESSAGE: &str = "Failed to process event through engine";
const FORWARD_FAILED_MESSAGE: &str = "Network error connecting to engine";

/// Cloneable handle to one warm engine instance
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<SupervisorConfig>,
    controller: Mutex<LifecycleController>,
    forwarder: RequestForwarder,
    prompts: PromptPolicy,
    state_rx: watch::Receiver<ServiceState>,
}

impl Supervisor {
    /// Supervisor running management commands as real subprocesses
    pub fn new(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let runner = Arc::new(ProcessCommandRunner::new(config.engine.management_timeout));
        Self::with_runner(config, runner)
    }

    /// Supervisor with a caller-provided management runner
    pub fn with_runner(
        config: SupervisorConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;

        let config = Arc::new(config);
        let controller = LifecycleController::new(config.clone(), runner);
        let state_rx = controller.subscribe();

        Ok(Self {
            inner: Arc::new(Inner {
                forwarder: RequestForwarder::from_config(&config),
                prompts: PromptPolicy::new(config.forward.default_prompt.clone()),
                controller: Mutex::new(controller),
                state_rx,
                config,
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.inner.state_rx.clone()
    }

    /// Bring the engine to Ready; concurrent callers wait for one bring-up
    pub async fn ensure_ready(&self) -> Result<ReadyOutcome, SupervisorError> {
        let mut controller = self.inner.controller.lock().await;
        controller.ensure_ready().await
    }

    /// Handle one invocation event
    pub async fn invoke(&self, event: Value) -> InvocationResponse {
        let invocation_id = Uuid::now_v7();
        let span = info_span!("invocation", invocation_id = %invocation_id);
        self.handle(InvocationEvent::from_value(event), invocation_id)
            .instrument(span)
            .await
    }

    /// Stop the engine
    pub async fn shutdown(&self) {
        self.inner.controller.lock().await.shutdown().await;
    }

    async fn handle(&self, event: InvocationEvent, invocation_id: Uuid) -> InvocationResponse {
        let outcome = match self.ensure_ready().await {
            Ok(outcome) => outcome,
            Err(e) => return InvocationResponse::failure(STARTUP_FAILED_MESSAGE, &e),
        };
        info!(
            generation = outcome.generation(),
            cold = outcome.is_cold(),
            "Engine ready"
        );

        let prompt = self.inner.prompts.extract(&event);
        debug!(source = ?prompt.source, "Extracted prompt");

        let body = match self.inner.config.forward.payload_mode {
            PayloadMode::Prompt => json!({ "prompt": prompt.value }),
            PayloadMode::Passthrough => event.to_value(),
        };
        let request = ForwardRequest::post_json(self.inner.config.forward.routes.clone(), body)
            .with_header(INVOCATION_ID_HEADER, invocation_id.to_string());

        let result = self
            .inner
            .forwarder
            .forward(self.state(), &request)
            .await
            .and_then(ForwardOutcome::into_result);

        match result {
            Ok(response) => {
                InvocationResponse::delivered(&response.route, &prompt.value, response.body)
            }
            Err(e) => InvocationResponse::failure(FORWARD_FAILED_MESSAGE, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::testing::FakeEngineCli;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SupervisorConfig::default();
        config.forward.routes.clear();
        let result = Supervisor::with_runner(config, Arc::new(FakeEngineCli::default()));
        assert!(matches!(result, Err(SupervisorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_startup_failure_becomes_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::default();
        config.engine.command = "/nonexistent/engine".to_string();
        config.engine.data_dir = dir.path().join("engine");
        config.workflow_path = dir.path().join("missing.json");

        let supervisor =
            Supervisor::with_runner(config, Arc::new(FakeEngineCli::default())).unwrap();
        let response = supervisor.invoke(json!({ "prompt": "hi" })).await;

        assert_eq!(response.status_code, 200);
        let body = response.body_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], STARTUP_FAILED_MESSAGE);
        assert_eq!(body["error_type"], "workflow_error");
        assert_eq!(supervisor.state(), ServiceState::Failed);
    }
}
