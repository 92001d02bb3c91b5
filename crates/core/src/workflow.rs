// Workflow artifacts
//
// The artifact is a static JSON document produced at build time. It is loaded
// once, never mutated, and re-imported into every provisioned generation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{ProvisioningError, WorkflowError};

/// Node type that registers an inbound webhook route
pub const WEBHOOK_NODE_TYPE: &str = "n8n-nodes-base.webhook";

/// Subdirectory of the data directory that holds staged workflows
pub const WORKFLOWS_DIR: &str = "workflows";

/// A single node of a workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Fields we do not interpret (position, typeVersion, credentials...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workflow definition imported into the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDescriptor {
    /// Parse and validate a workflow document
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        let descriptor: WorkflowDescriptor = serde_json::from_str(raw)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::Invalid("workflow id is empty".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(WorkflowError::Invalid(format!(
                "workflow {} has no nodes",
                self.id
            )));
        }
        Ok(())
    }

    /// Paths registered by webhook nodes, e.g. `echo` for `/webhook/echo`
    pub fn webhook_paths(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.node_type.as_deref() == Some(WEBHOOK_NODE_TYPE))
            .filter_map(|node| node.parameters.get("path").and_then(Value::as_str))
            .collect()
    }
}

/// A loaded descriptor together with the file the engine imports it from
#[derive(Debug, Clone)]
pub struct WorkflowArtifact {
    pub descriptor: WorkflowDescriptor,
    pub path: PathBuf,
}

impl WorkflowArtifact {
    /// Load the artifact from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkflowError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let descriptor = WorkflowDescriptor::from_json(&raw)?;

        tracing::debug!(
            workflow_id = %descriptor.id,
            nodes = descriptor.nodes.len(),
            path = %path.display(),
            "Loaded workflow artifact"
        );

        Ok(Self {
            descriptor,
            path: path.to_path_buf(),
        })
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Copy the artifact into `<data_dir>/workflows/<id>.json`
    ///
    /// The returned artifact points at the staged copy. Staging an artifact
    /// that already lives at the target path is a no-op.
    pub async fn stage(&self, data_dir: &Path) -> Result<WorkflowArtifact, ProvisioningError> {
        let dir = data_dir.join(WORKFLOWS_DIR);
        let target = dir.join(format!("{}.json", sanitize_file_stem(self.id())));

        if target == self.path {
            return Ok(self.clone());
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ProvisioningError::Staging {
                path: dir.clone(),
                source,
            })?;
        tokio::fs::copy(&self.path, &target)
            .await
            .map_err(|source| ProvisioningError::Staging {
                path: target.clone(),
                source,
            })?;

        tracing::debug!(
            workflow_id = %self.id(),
            staged = %target.display(),
            "Staged workflow into data directory"
        );

        Ok(WorkflowArtifact {
            descriptor: self.descriptor.clone(),
            path: target,
        })
    }
}

fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
