//! Python and shell-exec action backends: child processes with merged
//! environment, captured stdout, and kill-on-timeout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;

use crate::app_error::{AppCode, AppError};
use crate::backend::with_timeout;
use crate::config::{ExecConfig, PythonConfig};

/// Executes `python` and `exec` actions.
pub struct ProcessBackend {
    /// Agent-level env merged under the action's own `env`.
    agent_env: BTreeMap<String, String>,
}

impl ProcessBackend {
    /// Creates the backend with the workflow's agent environment.
    pub fn new(agent_env: BTreeMap<String, String>) -> Self {
        Self { agent_env }
    }

    /// Runs a Python script inside its named venv. Output is captured stdout.
    pub async fn run_python(&self, cfg: &PythonConfig) -> Result<Value, AppError> {
        let python = resolve_python(cfg.get_venv_name());
        let mut cmd = Command::new(python);
        match (&cfg.script, &cfg.script_file) {
            (Some(script), _) => {
                cmd.arg("-c").arg(script);
            }
            (None, Some(file)) => {
                cmd.arg(file);
            }
            (None, None) => {
                return Err(AppError::new(
                    AppCode::ResourceFailed,
                    "python action declares neither script nor scriptFile",
                ));
            }
        }
        cmd.args(&cfg.args);
        self.apply_env(&mut cmd, &cfg.env);
        with_timeout(cfg.timeout_duration, run_command(cmd)).await
    }

    /// Runs a shell command (or script file) as a child process.
    pub async fn run_exec(&self, cfg: &ExecConfig) -> Result<Value, AppError> {
        let mut cmd = match (&cfg.script, &cfg.script_file) {
            (Some(script), _) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(script);
                // Inline scripts receive args as positional shell parameters.
                if !cfg.args.is_empty() {
                    c.arg("sh").args(&cfg.args);
                }
                c
            }
            (None, Some(file)) => {
                let mut c = Command::new(file);
                c.args(&cfg.args);
                c
            }
            (None, None) => {
                return Err(AppError::new(
                    AppCode::ResourceFailed,
                    "exec action declares neither script nor scriptFile",
                ));
            }
        };
        if let Some(dir) = &cfg.working_dir {
            cmd.current_dir(dir);
        }
        self.apply_env(&mut cmd, &cfg.env);
        with_timeout(cfg.timeout_duration, run_command(cmd)).await
    }

    fn apply_env(&self, cmd: &mut Command, action_env: &BTreeMap<String, String>) {
        // Process env is inherited; agent env overlays it, the action's own
        // env wins last.
        for (k, v) in &self.agent_env {
            cmd.env(k, v);
        }
        for (k, v) in action_env {
            cmd.env(k, v);
        }
    }
}

/// The interpreter for a named venv: `<venv dir>/<name>/bin/python3` when the
/// venv exists, `python3` from PATH otherwise.
fn resolve_python(venv_name: &str) -> PathBuf {
    let candidate = env_config::venv_dir().join(venv_name).join("bin/python3");
    if candidate.is_file() {
        candidate
    } else {
        PathBuf::from("python3")
    }
}

async fn run_command(mut cmd: Command) -> Result<Value, AppError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = cmd.output().await.map_err(|e| {
        AppError::new(AppCode::ResourceFailed, "spawn child process").with_error(e)
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(AppError::new(
            AppCode::ResourceFailed,
            format!(
                "process exited with status {}",
                output.status.code().unwrap_or(-1)
            ),
        )
        .with_details("exitCode", output.status.code().unwrap_or(-1))
        .with_details("stderr", stderr.to_string()));
    }
    Ok(Value::String(
        stdout.strip_suffix('\n').unwrap_or(&stdout).to_string(),
    ))
}
