//! Python and shell-exec action configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::decode;

/// Python action: inline script or script file, run inside a named venv.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PythonConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(
        alias = "timeout",
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_duration: Option<Duration>,
    /// Virtual environment name; `default` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv_name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl PythonConfig {
    /// The venv the script runs in.
    pub fn get_venv_name(&self) -> &str {
        self.venv_name.as_deref().unwrap_or("default")
    }
}

/// Shell exec action: child process with merged environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(
        alias = "timeout",
        deserialize_with = "decode::flex_duration_opt",
        serialize_with = "decode::duration_opt_to_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}
