//! # Trellis
//!
//! Trellis executes declarative, YAML-described **agent workflows**: each
//! workflow is a dependency graph of resources, and each resource performs one
//! action — an LLM chat call, an HTTP request, a SQL transaction, a Python
//! script, or a shell command — before a terminal `apiResponse` resource
//! shapes the HTTP reply.
//!
//! ## Main modules
//!
//! - [`config`]: the typed workflow model with its permissive YAML/JSON
//!   dialect (string↔bool/int coercion, `timeout`↔`timeoutDuration` and
//!   `source`→`sources` aliases, flat-vs-nested session storage).
//! - [`expr`]: raw [`Expression`] text, kind classification, the nine-operation
//!   capability set, and the built-in minimal evaluator.
//! - [`error`] / [`app_error`]: the load-time numeric error family and the
//!   request-time [`AppError`] taxonomy with its HTTP status mapping.
//! - [`session`]: TTL key/value store ([`MemorySessionStore`],
//!   [`SqliteSessionStore`]) with a background [`Sweeper`].
//! - [`validate`]: field-rule and custom-expression input validation.
//! - [`backend`]: the uniform action contract over chat / httpClient / sql /
//!   python / exec.
//! - [`scheduler`]: topological execution with skip conditions, preflight
//!   checks, and `onError` continue / fail / retry policies.
//!
//! Key types are re-exported at the crate root:
//! `use trellis::{Workflow, Engine, RequestInput, AppError};`
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trellis::{Engine, RequestInput, Workflow};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workflow = Workflow::from_file("workflow.yaml")?;
//! let engine = Engine::new(workflow)?;
//! let response = engine
//!     .execute(RequestInput {
//!         method: "GET".into(),
//!         route: "/api/v1/run".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{} {}", response.status, response.body);
//! # Ok(())
//! # }
//! ```

pub mod app_error;
pub mod backend;
pub mod config;
pub mod error;
pub mod expr;
pub mod scheduler;
pub mod session;
pub mod validate;

pub use app_error::{AppCode, AppError};
pub use config::{Resource, RunConfig, Workflow, WorkflowSettings};
pub use error::{Error, ErrorCode};
pub use expr::{Capabilities, Evaluator, Expression};
pub use scheduler::{Engine, RequestInput, ResponseData};
pub use session::{MemorySessionStore, SessionStore, SqliteSessionStore, Sweeper};
pub use validate::{MultipleValidationError, ValidationError};
