//! End-to-end tests: real listener on a random port, real HTTP client.

mod common;

use serde_json::json;

use common::spawn_server;

const ECHO_WORKFLOW: &str = r#"
metadata:
  name: echo
  targetActionId: respond
resources:
  - metadata:
      actionId: respond
    run:
      apiResponse:
        success: true
        response:
          echo: "{{ input('msg') }}"
"#;

#[tokio::test]
async fn healthz_is_up() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let resp = reqwest::get(format!("{}/healthz", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn dispatch_shapes_response() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let resp = reqwest::get(format!("{}/api/v1/run?msg=hello", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["response"]["echo"], json!("hello"));
}

/// The session id echoes back; an anonymous caller gets a fresh one.
#[tokio::test]
async fn session_header_roundtrip() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v1/run", base))
        .header("X-Session-Id", "caller-7")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("x-session-id").unwrap().to_str().unwrap(),
        "caller-7"
    );

    let resp = client.get(format!("{}/api/v1/run", base)).send().await.unwrap();
    let sid = resp.headers().get("x-session-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(sid).is_ok());
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let resp = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
}

/// Per-route method lists from the apiServer config reject other methods.
#[tokio::test]
async fn route_method_list_enforced() {
    let wf = r#"
metadata:
  targetActionId: respond
settings:
  apiServer:
    routes:
      - path: /api/v1/run
        methods: [POST]
resources:
  - metadata:
      actionId: respond
    run:
      apiResponse:
        response: ok
"#;
    let (base, _handle) = spawn_server(wf).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/api/v1/run", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("BAD_REQUEST"));

    let resp = client.post(format!("{}/api/v1/run", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

/// Preflight denial surfaces the configured status through HTTP.
#[tokio::test]
async fn preflight_denial_over_http() {
    let wf = r#"
metadata:
  targetActionId: guarded
resources:
  - metadata:
      actionId: guarded
    run:
      preflightCheck:
        validations:
          - "get('role') == 'admin'"
        error:
          code: 403
          message: admins only
      apiResponse:
        response: secret
"#;
    let (base, _handle) = spawn_server(wf).await;
    let resp = reqwest::get(format!("{}/api/v1/run?role=user", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("PREFLIGHT_FAILED"));
    assert_eq!(body["error"]["message"], json!("admins only"));
    assert_eq!(body["error"]["resourceId"], json!("guarded"));
}

/// Validation failures arrive as 400 with the per-field details.
#[tokio::test]
async fn validation_failure_over_http() {
    let wf = r#"
metadata:
  targetActionId: intake
resources:
  - metadata:
      actionId: intake
    run:
      validation:
        rules:
          - field: email
            type: email
          - field: age
            type: integer
            min: 18
      apiResponse:
        response: ok
"#;
    let (base, _handle) = spawn_server(wf).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/run", base))
        .json(&json!({ "email": "not-an-email", "age": 12 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    assert_eq!(body["error"]["details"]["errors"].as_array().unwrap().len(), 2);
}

/// Bodies over the cap fail fast as REQUEST_TOO_LARGE.
#[tokio::test]
async fn oversized_body_is_413() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let huge = "x".repeat(serve::DEFAULT_BODY_LIMIT + 1);
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/run", base))
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("REQUEST_TOO_LARGE"));
}

/// CORS preflight answers with the configured origin handling.
#[tokio::test]
async fn cors_preflight() {
    let (base, _handle) = spawn_server(ECHO_WORKFLOW).await;
    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/api/v1/run", base))
        .header("Origin", "https://app.test")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    // Wildcard + credentials mirrors the requesting origin.
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .unwrap()
            .to_str()
            .unwrap(),
        "https://app.test"
    );
    assert_eq!(
        resp.headers()
            .get("access-control-allow-credentials")
            .unwrap()
            .to_str()
            .unwrap(),
        "true"
    );
}

/// Engine errors carry resource context; unknown targets 404.
#[tokio::test]
async fn failed_resource_maps_to_500() {
    let wf = r#"
metadata:
  targetActionId: boom
resources:
  - metadata:
      actionId: boom
    run:
      exec:
        script: "echo broken >&2; exit 9"
"#;
    let (base, _handle) = spawn_server(wf).await;
    let resp = reqwest::get(format!("{}/api/v1/run", base)).await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("RESOURCE_FAILED"));
    assert_eq!(body["error"]["resourceId"], json!("boom"));
    assert_eq!(body["error"]["details"]["exitCode"], json!(9));
}
