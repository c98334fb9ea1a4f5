//! Per-request, per-resource run state.

use std::time::Instant;

use serde_json::Value;

/// Lifecycle of one resource instance within a request.
///
/// `Pending → Ready → Running → Completed | Failed`, with `Skipped` short-cutting
/// out of `Pending`. A failure under `onError: continue` completes with the
/// fallback output; `retry` re-enters `Ready` until the attempt budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Pending,
    Ready,
    Running,
    Completed,
    Skipped,
    Failed,
}

/// Book-keeping for one resource instance; destroyed with the request.
#[derive(Debug, Default)]
pub struct RunState {
    pub state: ResourceState,
    /// Total attempts made (1 on a clean first run).
    pub attempts: u32,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub output: Value,
    pub last_error: Option<String>,
}

impl RunState {
    /// Marks the start of an attempt.
    pub fn begin_attempt(&mut self) {
        self.state = ResourceState::Running;
        self.attempts += 1;
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Marks completion with the captured output.
    pub fn complete(&mut self, output: Value) {
        self.state = ResourceState::Completed;
        self.ended_at = Some(Instant::now());
        self.output = output;
    }

    /// Marks terminal failure.
    pub fn fail(&mut self, error: &crate::app_error::AppError) {
        self.state = ResourceState::Failed;
        self.ended_at = Some(Instant::now());
        self.last_error = Some(error.to_string());
    }

    /// Marks the resource skipped; its output is null.
    pub fn skip(&mut self) {
        self.state = ResourceState::Skipped;
        self.ended_at = Some(Instant::now());
        self.output = Value::Null;
    }
}
