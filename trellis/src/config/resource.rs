//! One node of the workflow DAG.

use serde::{Deserialize, Serialize};

use crate::config::run::RunConfig;
use crate::error::{Error, ErrorCode};

/// Resource identity and dependencies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceMetadata {
    /// Unique id inside the workflow; `requires` entries refer to these.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

/// A workflow resource: metadata, iteration items, and the run spec.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub metadata: ResourceMetadata,
    /// Ordered sequence consumed by the `item()` capability.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<serde_json::Value>,
    pub run: RunConfig,
}

impl Resource {
    /// The resource's id.
    pub fn action_id(&self) -> &str {
        &self.metadata.action_id
    }

    /// Structural checks local to one resource; graph-level checks (unknown
    /// `requires`, cycles) happen at workflow load.
    pub fn validate(&self) -> Result<(), Error> {
        if self.metadata.action_id.is_empty() {
            return Err(Error::new(
                ErrorCode::InvalidResource,
                "resource has no actionId",
            ));
        }
        self.run
            .validate()
            .map_err(|e| Error::new(e.code(), format!("{}: {}", self.metadata.action_id, e.message())))
    }
}
