//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod approval;
pub mod error;
pub mod execution;
pub mod health;
pub mod pipeline;
pub mod stack;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Create the main API router with all endpoints
pub fn create_router(engine: Engine) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/validate", post(pipeline::validate_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route(
            "/pipeline/{id}",
            get(pipeline::get_pipeline).delete(pipeline::delete_pipeline),
        )
        .route("/pipeline/{id}/versions", get(pipeline::list_versions))
        .route("/pipeline/{id}/trigger", post(pipeline::trigger_pipeline))
        // Execution endpoints
        .route("/execution/list", get(execution::list_executions))
        .route(
            "/execution/pipeline/{pipeline_id}",
            get(execution::list_executions_by_pipeline),
        )
        .route("/execution/{id}", get(execution::get_execution))
        .route("/execution/{id}/cancel", post(execution::cancel_execution))
        .route("/execution/{id}/logs", get(execution::get_execution_logs))
        .route(
            "/execution/{id}/approval/{action}",
            post(approval::decide),
        )
        // Approval and stack endpoints
        .route("/approval/pending", get(approval::list_pending))
        .route("/stack/list", get(stack::list_stacks))
        // Add state and middleware
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use conveyor_core::dto::pipeline::ValidationReport;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::Database;
    use crate::engine::Collaborators;
    use crate::engine::local::{
        DirectorySource, LocalChangeSetEngine, LocalCredentialIssuer, ShellCommandRunner,
    };

    fn engine() -> Engine {
        let config = Config::default();
        let collaborators = Collaborators::new(
            Arc::new(DirectorySource::new(None)),
            Arc::new(ShellCommandRunner::new(Default::default())),
            Arc::new(LocalCredentialIssuer::new(
                config.account.clone(),
                config.allowed_role_tags.clone(),
            )),
            Arc::new(LocalChangeSetEngine::new()),
        );
        Engine::new(Database::new(), config, collaborators)
    }

    fn definition(name: &str) -> Value {
        json!({
            "name": name,
            "stages": [
                {
                    "name": "Source",
                    "actions": [{
                        "name": "Checkout",
                        "outputs": ["source"],
                        "params": { "kind": "SOURCE", "repository": name }
                    }]
                },
                {
                    "name": "Gate",
                    "actions": [{
                        "name": "Approve",
                        "params": { "kind": "APPROVAL", "timeout_secs": 60 }
                    }]
                }
            ]
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(engine());
        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate_pipeline() {
        let app = create_router(engine());

        let (status, created) = send(
            &app,
            "POST",
            "/pipeline/create",
            Some(json!({ "definition": definition("Orders") })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["version"], 1);

        let id = created["id"].as_str().unwrap().to_string();
        let (status, fetched) = send(&app, "GET", &format!("/pipeline/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "Orders");

        let (status, versions) =
            send(&app, "GET", &format!("/pipeline/{}/versions", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(versions.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "POST",
            "/pipeline/create",
            Some(json!({ "definition": definition("Orders") })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let (_, list) = send(&app, "GET", "/pipeline/list", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_rejected() {
        let app = create_router(engine());
        let mut def = definition("Broken");
        def["stages"][1]["actions"][0]["outputs"] = json!(["nope"]);

        let (status, body) = send(
            &app,
            "POST",
            "/pipeline/create",
            Some(json!({ "definition": def.clone() })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Approve"));

        let (status, report) = send(
            &app,
            "POST",
            "/pipeline/validate",
            Some(json!({ "definition": def })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let report: ValidationReport = serde_json::from_value(report).unwrap();
        assert!(!report.valid);
    }

    #[tokio::test]
    async fn test_trigger_approve_and_inspect() {
        let app = create_router(engine());
        let (_, created) = send(
            &app,
            "POST",
            "/pipeline/create",
            Some(json!({ "definition": definition("Gated") })),
        )
        .await;
        let pipeline_id = created["id"].as_str().unwrap().to_string();

        let (status, execution) = send(
            &app,
            "POST",
            &format!("/pipeline/{}/trigger", pipeline_id),
            Some(json!({ "branch": "main", "commit": "abc", "files": { "README.md": "hi" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let execution_id = execution["id"].as_str().unwrap().to_string();

        let mut pending = Value::Null;
        for _ in 0..200 {
            let (_, body) = send(&app, "GET", "/approval/pending", None).await;
            if !body.as_array().unwrap().is_empty() {
                pending = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(pending[0]["action"], "Approve");

        let (status, gate) = send(
            &app,
            "POST",
            &format!("/execution/{}/approval/Approve", execution_id),
            Some(json!({ "decision": "APPROVED", "actor": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(gate["state"], "APPROVED");

        // A second decision on the same gate conflicts
        let (status, _) = send(
            &app,
            "POST",
            &format!("/execution/{}/approval/Approve", execution_id),
            Some(json!({ "decision": "REJECTED", "actor": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut finished = Value::Null;
        for _ in 0..200 {
            let (_, body) = send(&app, "GET", &format!("/execution/{}", execution_id), None).await;
            if body["status"] != "IN_PROGRESS" {
                finished = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(finished["status"], "SUCCEEDED");

        let (status, logs) =
            send(&app, "GET", &format!("/execution/{}/logs", execution_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!logs.as_array().unwrap().is_empty());

        let (_, runs) = send(
            &app,
            "GET",
            &format!("/execution/pipeline/{}", pipeline_id),
            None,
        )
        .await;
        assert_eq!(runs.as_array().unwrap().len(), 1);

        // Finished executions cannot be cancelled
        let (status, _) = send(
            &app,
            "POST",
            &format!("/execution/{}/cancel", execution_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_trigger_on_untracked_branch() {
        let app = create_router(engine());
        let (_, created) = send(
            &app,
            "POST",
            "/pipeline/create",
            Some(json!({ "definition": definition("Branchy") })),
        )
        .await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/pipeline/{}/trigger", created["id"].as_str().unwrap()),
            Some(json!({ "branch": "dev", "commit": "abc", "files": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("dev"));

        let (status, body) = send(
            &app,
            "POST",
            &format!("/pipeline/{}/trigger", created["id"].as_str().unwrap()),
            Some(json!({ "branch": "main", "commit": "abc", "files": { "../../etc/cron.d/x": "boom" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("leaves the workspace"));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let app = create_router(engine());
        let id = uuid::Uuid::new_v4();

        let (status, _) = send(&app, "GET", &format!("/pipeline/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", &format!("/execution/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/execution/{}/approval/Approve", id),
            Some(json!({ "decision": "APPROVED", "actor": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, stacks) = send(&app, "GET", "/stack/list", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(stacks.as_array().unwrap().is_empty());
    }
}
