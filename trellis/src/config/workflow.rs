//! The top-level workflow document: load, validate, round-trip.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::resource::Resource;
use crate::config::settings::WorkflowSettings;
use crate::error::{Error, ErrorCode};
use crate::scheduler::graph::DependencyGraph;

/// Workflow identity plus the target of incoming requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Semver-style string; not enforced by the engine.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// The resource a request resolves to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_action_id: String,
    /// Names of companion workflows that may also carry the target.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<String>,
}

/// A complete workflow document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workflow {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub metadata: WorkflowMetadata,
    pub settings: WorkflowSettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

impl Workflow {
    /// Parses a YAML document and validates it.
    pub fn from_yaml_str(s: &str) -> Result<Self, Error> {
        let wf: Workflow = serde_yaml::from_str(s)
            .map_err(|e| Error::new(ErrorCode::ParseError, "parse workflow yaml").with_cause(e))?;
        wf.validate()?;
        Ok(wf)
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let wf: Workflow = serde_json::from_str(s)
            .map_err(|e| Error::new(ErrorCode::ParseError, "parse workflow json").with_cause(e))?;
        wf.validate()?;
        Ok(wf)
    }

    /// Reads and parses a workflow file; `.json` parses as JSON, anything
    /// else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::new(
                ErrorCode::ParseError,
                format!("read workflow {}", path.display()),
            )
            .with_cause(e)
        })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Looks up a resource by its `actionId`.
    pub fn resource(&self, action_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.metadata.action_id == action_id)
    }

    /// The resource the workflow's `targetActionId` names, when local.
    pub fn target_resource(&self) -> Option<&Resource> {
        self.resource(&self.metadata.target_action_id)
    }

    /// Load-time validation: per-resource checks, unique action ids,
    /// resolvable `requires` and `targetActionId`, acyclic dependency graph.
    pub fn validate(&self) -> Result<(), Error> {
        for r in &self.resources {
            r.validate()?;
        }

        let mut seen = std::collections::HashSet::new();
        for r in &self.resources {
            if !seen.insert(r.action_id()) {
                return Err(Error::new(
                    ErrorCode::InvalidResource,
                    format!("duplicate actionId '{}'", r.action_id()),
                ));
            }
        }

        for r in &self.resources {
            for dep in &r.metadata.requires {
                if !seen.contains(dep.as_str()) {
                    return Err(Error::new(
                        ErrorCode::InvalidResource,
                        format!("'{}' requires unknown resource '{}'", r.action_id(), dep),
                    ));
                }
            }
        }

        let target = &self.metadata.target_action_id;
        if target.is_empty() {
            return Err(Error::new(
                ErrorCode::InvalidWorkflow,
                "metadata.targetActionId is not set",
            ));
        }
        // A target may live in a companion workflow; only reject when there is
        // nowhere left to resolve it.
        if !seen.contains(target.as_str()) && self.metadata.workflows.is_empty() {
            return Err(Error::new(
                ErrorCode::InvalidWorkflow,
                format!("targetActionId '{}' does not name a resource", target),
            ));
        }

        // Cycle detection; the graph reports one representative cycle.
        DependencyGraph::build(&self.resources)?;
        Ok(())
    }
}
