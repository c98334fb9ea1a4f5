//! Serve a workflow file: `trellis-serve <workflow.yaml>`.

use trellis::Workflow;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = config::load_and_apply("trellis", None) {
        eprintln!("warning: env bootstrap failed: {}", e);
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: trellis-serve <workflow.yaml>");
        std::process::exit(2);
    });
    let workflow = Workflow::from_file(&path)?;
    serve::run_serve(workflow).await
}
