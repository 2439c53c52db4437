//! API integration tests.
//!
//! These tests drive the router with `tower::ServiceExt::oneshot` against
//! engines backed by in-memory storage.

use crate::common::{Engines, start_engines};

use cadence::api::{build_router, create_api_state};
use cadence::testing::ScriptedAction;
use cadence::{
    ActionDispatcher, InMemoryStorage, SchedulerSettings, Storage, Workflow, WorkflowId,
    WorkflowStep,
};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn engines() -> Engines<InMemoryStorage> {
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("ok", ScriptedAction::succeeding(json!({ "done": true })));
    dispatcher.register("fail", ScriptedAction::failing("boom"));
    start_engines(
        Arc::new(InMemoryStorage::new()),
        dispatcher,
        None,
        SchedulerSettings::default(),
    )
    .await
}

fn router(engines: &Engines<InMemoryStorage>) -> Router {
    build_router(create_api_state(
        engines.scheduler.clone(),
        engines.workflows.clone(),
    ))
}

/// Send a request and return the status and parsed JSON body.
async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn cron_task(name: &str, action: &str) -> Value {
    json!({
        "name": name,
        "type": "cron",
        "schedule": "0 0 1 1 *",
        "action": action,
        "max_retries": 0,
    })
}

/// Test: health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let engines = engines().await;
    let (status, json) = send(&router(&engines), Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: a task can be created, fetched, listed, patched and deleted.
#[tokio::test]
async fn test_task_crud() {
    let engines = engines().await;
    let router = router(&engines);

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(cron_task("yearly", "ok")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "yearly");
    assert_eq!(created["type"], "cron");
    assert!(created["next_run"].is_string());
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&router, Method::GET, &format!("/api/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id.as_str());

    let (_, list) = send(&router, Method::GET, "/api/tasks?enabled=true", None).await;
    assert_eq!(list["count"], 1);
    assert_eq!(list["tasks"][0]["id"], id.as_str());

    let (status, patched) = send(
        &router,
        Method::PATCH,
        &format!("/api/tasks/{}", id),
        Some(json!({ "description": "once a year" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["description"], "once a year");

    let (status, _) = send(&router, Method::DELETE, &format!("/api/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, err) = send(&router, Method::GET, &format!("/api/tasks/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "NOT_FOUND");
}

/// Test: invalid schedules are rejected with 400.
#[tokio::test]
async fn test_schedule_task_validation() {
    let engines = engines().await;
    let router = router(&engines);

    let (status, err) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({
            "name": "fast",
            "type": "interval",
            "schedule": 10,
            "action": "ok",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "BAD_REQUEST");

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(json!({
            "name": "broken",
            "type": "cron",
            "schedule": "every tuesday",
            "action": "ok",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: disable and enable toggle the task's trigger.
#[tokio::test]
async fn test_enable_disable_task() {
    let engines = engines().await;
    let router = router(&engines);

    let (_, created) = send(
        &router,
        Method::POST,
        "/api/tasks",
        Some(cron_task("toggle", "ok")),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, disabled) = send(
        &router,
        Method::POST,
        &format!("/api/tasks/{}/disable", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(disabled["enabled"], false);
    assert!(disabled["next_run"].is_null());

    let (status, enabled) = send(
        &router,
        Method::POST,
        &format!("/api/tasks/{}/enable", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enabled["enabled"], true);
    assert!(enabled["next_run"].is_string());
}

/// Test: running a task returns the outcome and records history.
#[tokio::test]
async fn test_run_task_and_history() {
    let engines = engines().await;
    let router = router(&engines);

    let (_, ok_task) =
        send(&router, Method::POST, "/api/tasks", Some(cron_task("good", "ok"))).await;
    let ok_id = ok_task["id"].as_str().unwrap().to_string();
    let (_, bad_task) =
        send(&router, Method::POST, "/api/tasks", Some(cron_task("bad", "fail"))).await;
    let bad_id = bad_task["id"].as_str().unwrap().to_string();

    let (status, outcome) =
        send(&router, Method::POST, &format!("/api/tasks/{}/run", ok_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["result"]["done"], true);

    let (status, outcome) =
        send(&router, Method::POST, &format!("/api/tasks/{}/run", bad_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "error");
    assert_eq!(outcome["error"], "boom");

    send(&router, Method::POST, &format!("/api/tasks/{}/run", ok_id), None).await;
    let (status, history) = send(
        &router,
        Method::GET,
        &format!("/api/tasks/{}/history?limit=1", ok_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["count"], 1);
    assert_eq!(history["executions"][0]["status"], "success");
}

/// Test: unknown and malformed ids both answer 404.
#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let engines = engines().await;
    let router = router(&engines);

    for uri in [
        "/api/tasks/not-a-uuid",
        "/api/tasks/00000000-0000-0000-0000-000000000000",
        "/api/tasks/not-a-uuid/history",
        "/api/workflows/not-a-uuid",
        "/api/workflows/00000000-0000-0000-0000-000000000000/history",
    ] {
        let (status, _) = send(&router, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/tasks/00000000-0000-0000-0000-000000000000/run",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: workflows can be created, executed and inspected.
#[tokio::test]
async fn test_workflow_lifecycle() {
    let engines = engines().await;
    let router = router(&engines);

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/workflows",
        Some(json!({
            "name": "pipeline",
            "steps": [
                { "name": "first", "action": "ok", "output_variable": "first" },
                { "name": "second", "action": "fail", "critical": false },
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, execution) = send(
        &router,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({ "context": { "run": 1 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution["status"], "success");
    assert_eq!(execution["context"]["run"], 1);
    assert_eq!(execution["context"]["first"]["done"], true);
    assert_eq!(execution["results"][1]["success"], false);

    let (_, history) = send(
        &router,
        Method::GET,
        &format!("/api/workflows/{}/history", id),
        None,
    )
    .await;
    assert_eq!(history["count"], 1);

    let (_, list) = send(&router, Method::GET, "/api/workflows", None).await;
    assert_eq!(list["count"], 1);

    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("/api/workflows/{}", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, Method::GET, &format!("/api/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: an aborted workflow answers 422 and a workflow without steps 400.
#[tokio::test]
async fn test_workflow_errors() {
    let engines = engines().await;
    let router = router(&engines);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/workflows",
        Some(json!({ "name": "empty", "steps": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, created) = send(
        &router,
        Method::POST,
        "/api/workflows",
        Some(json!({
            "name": "doomed",
            "steps": [{ "name": "explode", "action": "fail" }],
        })),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, err) = send(
        &router,
        Method::POST,
        &format!("/api/workflows/{}/execute", id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "WORKFLOW_ABORTED");
    assert!(err["error"].as_str().unwrap().contains("boom"));
}

/// Test: executing a disabled workflow answers 409.
#[tokio::test]
async fn test_disabled_workflow_conflict() {
    let engines = engines().await;
    let router = router(&engines);

    let now = Utc::now();
    let workflow = Workflow {
        id: WorkflowId::new(),
        name: "parked".into(),
        description: None,
        steps: vec![WorkflowStep::new("only", "ok")],
        enabled: false,
        created_at: now,
        updated_at: now,
    };
    engines.store.create_workflow(&workflow).await.unwrap();

    let (status, err) = send(
        &router,
        Method::POST,
        &format!("/api/workflows/{}/execute", workflow.id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "CONFLICT");
}

/// Test: templates are listed and can seed a workflow.
#[tokio::test]
async fn test_templates() {
    let engines = engines().await;
    let router = router(&engines);

    let (status, templates) = send(&router, Method::GET, "/api/templates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(templates["count"], 4);
    assert_eq!(templates["templates"][0]["id"], "daily-maintenance");

    let (status, created) = send(
        &router,
        Method::POST,
        "/api/workflows/from-template",
        Some(json!({ "template": "backup-project", "name": "Nightly backup" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Nightly backup");
    assert_eq!(created["steps"].as_array().unwrap().len(), 3);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/workflows/from-template",
        Some(json!({ "template": "weekly-magic" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: stats combine scheduler and workflow counts.
#[tokio::test]
async fn test_stats_endpoint() {
    let engines = engines().await;
    let router = router(&engines);

    send(&router, Method::POST, "/api/tasks", Some(cron_task("one", "ok"))).await;
    send(
        &router,
        Method::POST,
        "/api/workflows/from-template",
        Some(json!({ "template": "daily-maintenance" })),
    )
    .await;

    let (status, stats) = send(&router, Method::GET, "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["scheduler"]["total_tasks"], 1);
    assert_eq!(stats["scheduler"]["active_triggers"], 1);
    assert_eq!(stats["workflows"]["total_workflows"], 1);
    assert_eq!(stats["workflows"]["templates"], 4);
}
