//! Dependency-ordered resource scheduler.
//!
//! [`Engine`] owns a validated workflow and executes requests against it:
//! resolve the target's dependency closure, walk it in topological order, and
//! run each resource's `exprBefore` / `before[]` / primary / `after[]` /
//! `expr[]` / `exprAfter[]` pipeline with skip conditions, preflight checks,
//! input validation, and the per-resource `onError` policy.

pub mod graph;

mod executor;
mod scope;
mod state;

pub use executor::{Engine, RequestInput, ResponseData};
pub use graph::DependencyGraph;
pub use scope::RequestScope;
pub use state::{ResourceState, RunState};
