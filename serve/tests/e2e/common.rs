//! Shared helpers for e2e tests: bind a random port and serve a workflow
//! parsed from inline YAML.

use tokio::net::TcpListener;

use trellis::{Engine, Workflow};

/// Spawns the server in the background. Returns the base URL and the join
/// handle (kept alive by the caller for the test's duration).
pub async fn spawn_server(
    workflow_yaml: &str,
) -> (
    String,
    tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
) {
    let workflow = Workflow::from_yaml_str(workflow_yaml).expect("workflow parses");
    let engine = Engine::new(workflow).expect("engine builds");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(serve::run_serve_on_listener(listener, engine));
    (format!("http://{}", addr), handle)
}
