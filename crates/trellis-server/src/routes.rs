use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use trellis_drivers::{Context, DriverRegistry};
use trellis_engine::Executor;
use trellis_graph::{Edge, Node};
use trellis_progress::ExecutionCache;
use trellis_store::{ExecutionRecord, Store, TriggerSource};

use crate::dispatch::{Dispatcher, ExecutionJob};

/// Budget for the worker liveness ping on the async endpoints.
const WORKER_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared state behind every handler.
pub struct AppState {
  pub registry: Arc<DriverRegistry>,
  pub cache: Arc<ExecutionCache>,
  pub dispatcher: Dispatcher,
  /// Optional persistence; without it the trigger endpoint 404s and no
  /// history rows are written.
  pub store: Option<Arc<dyn Store>>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/execute-node", post(execute_node))
    .route("/execute-workflow", post(execute_workflow))
    .route("/execute-workflow-async", post(execute_workflow_async))
    .route("/execution/{execution_id}/status", get(execution_status))
    .route("/workflows/{workflow_id}/trigger", post(trigger_workflow))
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
    .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!(%addr, "trellis server listening");
  axum::serve(listener, router(state)).await
}

async fn health() -> impl IntoResponse {
  Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct ExecuteNodePayload {
  node: Option<Value>,
  #[serde(default)]
  context: Context,
}

async fn execute_node(
  State(state): State<Arc<AppState>>,
  Json(payload): Json<ExecuteNodePayload>,
) -> Response {
  let raw_node = payload.node.unwrap_or(Value::Null);
  if raw_node.get("type").and_then(Value::as_str).is_none() {
    return error_response(StatusCode::BAD_REQUEST, "node.type is required");
  }
  let node: Node = match serde_json::from_value(raw_node) {
    Ok(node) => node,
    Err(err) => {
      return error_response(StatusCode::BAD_REQUEST, format!("invalid node: {err}"));
    }
  };

  let result = state.registry.execute(&node.node_type, &node, &payload.context).await;
  let status = if result.is_ok() { StatusCode::OK } else { StatusCode::BAD_REQUEST };
  (status, Json(result)).into_response()
}

#[derive(Deserialize)]
struct ExecuteWorkflowPayload {
  #[serde(default)]
  nodes: Vec<Node>,
  #[serde(default)]
  edges: Vec<Edge>,
  #[serde(default)]
  context: Context,
  #[serde(rename = "startNodeId")]
  start_node_id: Option<String>,
  #[serde(rename = "workflowId")]
  workflow_id: Option<String>,
}

async fn execute_workflow(
  State(state): State<Arc<AppState>>,
  Json(payload): Json<ExecuteWorkflowPayload>,
) -> Response {
  let executor = Executor::new(state.registry.clone());
  let outcome = executor
    .execute(
      &payload.nodes,
      &payload.edges,
      payload.context,
      payload.start_node_id.as_deref(),
    )
    .await;

  let status = if outcome.is_ok() { StatusCode::OK } else { StatusCode::BAD_REQUEST };
  (status, Json(outcome)).into_response()
}

async fn execute_workflow_async(
  State(state): State<Arc<AppState>>,
  Json(payload): Json<ExecuteWorkflowPayload>,
) -> Response {
  if payload.nodes.is_empty() {
    return error_response(StatusCode::BAD_REQUEST, "nodes are required");
  }

  dispatch_execution(
    &state,
    payload.nodes,
    payload.edges,
    payload.context,
    payload.start_node_id,
    payload.workflow_id,
    TriggerSource::Manual,
  )
  .await
}

async fn execution_status(
  State(state): State<Arc<AppState>>,
  Path(execution_id): Path<String>,
) -> Response {
  match state.cache.get(&execution_id) {
    Some(execution_state) => (StatusCode::OK, Json(execution_state)).into_response(),
    None => (
      StatusCode::NOT_FOUND,
      Json(json!({ "status": "not_found", "error": "Execution not found or expired" })),
    )
      .into_response(),
  }
}

#[derive(Deserialize, Default)]
struct TriggerPayload {
  #[serde(default)]
  input: Value,
}

async fn trigger_workflow(
  State(state): State<Arc<AppState>>,
  Path(workflow_id): Path<String>,
  headers: HeaderMap,
  body: axum::body::Bytes,
) -> Response {
  let Some(api_key) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) else {
    return error_response(StatusCode::UNAUTHORIZED, "X-API-Key header is required");
  };

  let Some(store) = state.store.as_ref() else {
    return error_response(StatusCode::NOT_FOUND, "Workflow not found");
  };
  let workflow = match store.get_workflow(&workflow_id).await {
    Ok(workflow) => workflow,
    Err(trellis_store::Error::NotFound(_)) => {
      return error_response(StatusCode::NOT_FOUND, "Workflow not found");
    }
    Err(err) => {
      warn!(error = %err, "workflow lookup failed");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage error");
    }
  };

  if !workflow.api_enabled {
    return error_response(StatusCode::FORBIDDEN, "API access is not enabled for this workflow");
  }
  if workflow.api_key.as_deref() != Some(api_key) {
    return error_response(StatusCode::FORBIDDEN, "Invalid API key");
  }

  let nodes: Vec<Node> = match serde_json::from_value(workflow.nodes.0.clone()) {
    Ok(nodes) => nodes,
    Err(err) => {
      warn!(error = %err, "stored workflow nodes are malformed");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "stored workflow is invalid");
    }
  };
  let edges: Vec<Edge> =
    serde_json::from_value(workflow.edges.0.clone()).unwrap_or_default();

  let payload: TriggerPayload = serde_json::from_slice(&body).unwrap_or_default();
  let context = Context { input: payload.input, ..Context::default() };

  dispatch_execution(
    &state,
    nodes,
    edges,
    context,
    None,
    Some(workflow.workflow_id),
    TriggerSource::Api,
  )
  .await
}

/// Shared tail of the async endpoints: worker ping, history row, enqueue.
async fn dispatch_execution(
  state: &Arc<AppState>,
  nodes: Vec<Node>,
  edges: Vec<Edge>,
  context: Context,
  start_node_id: Option<String>,
  workflow_id: Option<String>,
  triggered_by: TriggerSource,
) -> Response {
  if !state.dispatcher.ping(WORKER_PING_TIMEOUT).await {
    return error_response(
      StatusCode::SERVICE_UNAVAILABLE,
      "Task workers are unavailable. Please retry later.",
    );
  }

  let execution_id = uuid::Uuid::new_v4().to_string();

  // The history row is best-effort and only written when the workflow is
  // known to the store.
  let mut history_workflow_id = None;
  if let (Some(store), Some(workflow_id)) = (state.store.as_ref(), workflow_id.as_ref()) {
    if store.get_workflow(workflow_id).await.is_ok() {
      let record = ExecutionRecord::started(
        execution_id.clone(),
        Some(workflow_id.clone()),
        serde_json::to_string(&context.input).unwrap_or_default(),
        triggered_by,
      );
      match store.create_execution(&record).await {
        Ok(()) => history_workflow_id = Some(workflow_id.clone()),
        Err(err) => warn!(error = %err, "failed to create execution record"),
      }
    }
  }

  let job = ExecutionJob {
    execution_id: execution_id.clone(),
    nodes,
    edges,
    context,
    start_node_id,
    workflow_id: history_workflow_id,
  };

  if let Err(err) = state.dispatcher.enqueue(job) {
    warn!(execution_id = %execution_id, error = %err, "failed to enqueue execution");
    state.cache.update(&execution_id, |entry| {
      entry.status = trellis_progress::ExecutionStatus::Error;
      entry.error = Some("Task queue is unavailable".to_string());
    });
    return error_response(
      StatusCode::SERVICE_UNAVAILABLE,
      "Task queue is unavailable. Please retry later.",
    );
  }

  (
    StatusCode::ACCEPTED,
    Json(json!({ "executionId": execution_id, "status": "started" })),
  )
    .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
  (status, Json(json!({ "status": "error", "error": message.into() }))).into_response()
}
