//! HTTP worker consuming this service's task queue.
//!
//! `POST /queues/<queue>/tasks/<name>` runs the named operation with the JSON body as its
//! payload. The ticks service delivers ticks through the same route.

use crate::error::{ErrorKind, ForwardtestError};
use crate::models::ServiceInfo;
use crate::operations::{dispatch, Operation, OperationOutput};
use crate::service::ForwardtestService;
use crate::tasks::TASK_ID_HEADER;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

pub fn router(service: ForwardtestService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queues/:queue/tasks/:name", post(run_task))
        .with_state(service)
}

pub async fn serve(service: ForwardtestService, listen_address: &str) -> Result<()> {
    let queue = service.settings().task_queue.clone();
    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind {}", listen_address))?;
    log::info!(
        "Worker listening on {} for task queue {}",
        listen_address,
        queue
    );
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("worker server failed")?;
    log::info!("Worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

async fn health(State(service): State<ForwardtestService>) -> Json<ServiceInfo> {
    Json(service.service_info())
}

pub async fn run_task(
    State(service): State<ForwardtestService>,
    Path((queue, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<OperationOutput>, TaskError> {
    if queue != service.settings().task_queue {
        return Err(TaskError::WrongQueue(queue));
    }
    let task_id = task_id(&headers);
    log::debug!("Received task {} ({})", name, task_id);

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            TaskError::Operation(ForwardtestError::InvalidPayload {
                operation: name.clone(),
                reason: err.to_string(),
            })
        })?
    };

    let operation = Operation::from_task(&name, payload)?;
    match dispatch(&service, operation).await {
        Ok(output) => Ok(Json(output)),
        Err(err) => {
            log::warn!("Task {} ({}) failed: {}", name, task_id, err);
            Err(err.into())
        }
    }
}

fn task_id(headers: &HeaderMap) -> &str {
    headers
        .get(TASK_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
}

#[derive(Debug)]
pub enum TaskError {
    WrongQueue(String),
    Operation(ForwardtestError),
}

impl From<ForwardtestError> for TaskError {
    fn from(err: ForwardtestError) -> Self {
        TaskError::Operation(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NoPrice => StatusCode::FAILED_DEPENDENCY,
        ErrorKind::Downstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            TaskError::WrongQueue(queue) => (
                StatusCode::NOT_FOUND,
                ErrorKind::NotFound.as_str(),
                format!("task queue {} is not served here", queue),
            ),
            TaskError::Operation(err) => {
                let kind = err.kind();
                (status_for(kind), kind.as_str(), err.to_string())
            }
        };
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_statuses() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NoPrice), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(status_for(ErrorKind::Downstream), StatusCode::BAD_GATEWAY);

        let response = TaskError::from(ForwardtestError::DuplicateTask("t".to_string()))
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = TaskError::WrongQueue("other".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn task_id_is_read_from_the_dispatch_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(task_id(&headers), "-");
        headers.insert(
            axum::http::HeaderName::from_static(TASK_ID_HEADER),
            "forwardtest-x-exit".parse().unwrap(),
        );
        assert_eq!(task_id(&headers), "forwardtest-x-exit");
    }
}
