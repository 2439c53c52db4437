//! HTTP API module for the cadence scheduler.
//!
//! Provides REST endpoints for managing tasks and workflows, running them
//! on demand, and reading their history.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{ApiState, ExecuteWorkflowRequest, FromTemplateRequest, HistoryQuery};
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::scheduler::SchedulerHandle;
use crate::storage::Storage;
use crate::workflow::WorkflowEngine;

/// Build the API router with all endpoints.
pub fn build_router<S: Storage + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats::<S>))
        // Tasks
        .route(
            "/api/tasks",
            get(handlers::list_tasks::<S>).post(handlers::schedule_task::<S>),
        )
        .route(
            "/api/tasks/{id}",
            get(handlers::get_task::<S>)
                .patch(handlers::update_task::<S>)
                .delete(handlers::delete_task::<S>),
        )
        .route("/api/tasks/{id}/enable", post(handlers::enable_task::<S>))
        .route("/api/tasks/{id}/disable", post(handlers::disable_task::<S>))
        .route("/api/tasks/{id}/run", post(handlers::run_task::<S>))
        .route("/api/tasks/{id}/history", get(handlers::task_history::<S>))
        // Workflows
        .route(
            "/api/workflows",
            get(handlers::list_workflows::<S>).post(handlers::create_workflow::<S>),
        )
        .route(
            "/api/workflows/from-template",
            post(handlers::create_from_template::<S>),
        )
        .route(
            "/api/workflows/{id}",
            get(handlers::get_workflow::<S>).delete(handlers::delete_workflow::<S>),
        )
        .route(
            "/api/workflows/{id}/execute",
            post(handlers::execute_workflow::<S>),
        )
        .route(
            "/api/workflows/{id}/history",
            get(handlers::workflow_history::<S>),
        )
        .route("/api/templates", get(handlers::list_templates::<S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from the running engines.
pub fn create_api_state<S: Storage>(
    scheduler: SchedulerHandle<S>,
    workflows: Arc<WorkflowEngine<S>>,
) -> ApiState<S> {
    ApiState {
        scheduler,
        workflows,
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Storage + 'static>(
    config: &ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    Ok(handle)
}
