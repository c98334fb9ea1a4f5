//! Typed workflow configuration model.
//!
//! One deserializer per top-level entity, accepting YAML and JSON with the
//! permissive scalar dialect of [`decode`]: string spellings of bools and
//! ints, `timeout` ↔ `timeoutDuration` aliases, legacy `source` → `sources`,
//! flat-vs-nested session storage. The in-memory model is canonical; all
//! aliasing is resolved at decode time, and serialization emits the canonical
//! long form so that a marshal/unmarshal round trip compares equal.

pub mod decode;

mod api_response;
mod chat;
mod http;
mod input;
mod process;
mod resource;
mod run;
mod session;
mod settings;
mod sql;
mod validation;
mod workflow;

pub use api_response::{ApiResponseConfig, ApiResponseMeta};
pub use chat::{
    ChatConfig, ScenarioTurn, DEFAULT_CONTEXT_LENGTH, RECOGNIZED_BACKENDS,
    RECOGNIZED_CONTEXT_LENGTHS,
};
pub use decode::{format_duration, parse_duration, BoolOrExpr};
pub use http::{
    HttpAuthConfig, HttpAuthKind, HttpCacheConfig, HttpClientConfig, HttpTlsConfig, RetryConfig,
};
pub use input::InputConfig;
pub use process::{ExecConfig, PythonConfig};
pub use resource::{Resource, ResourceMetadata};
pub use run::{
    InlineResource, OnErrorAction, OnErrorConfig, PreflightCheck, PreflightError, PrimaryAction,
    RunConfig,
};
pub use session::{SessionConfig, SessionStorage, SessionType};
pub use settings::{
    AgentSettings, ApiServerConfig, CorsConfig, RouteConfig, SqlConnection, WorkflowSettings,
    DEFAULT_HOST_IP, DEFAULT_PORT,
};
pub use sql::{PoolConfig, SqlConfig, SqlFormat, SqlQuery};
pub use validation::{CustomRule, FieldRule, FieldType, ValidationRules};
pub use workflow::{Workflow, WorkflowMetadata};
