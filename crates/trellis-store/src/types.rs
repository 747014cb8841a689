use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Terminal-or-not status of an execution-history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Error,
}

/// How an execution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerSource {
  Manual,
  Api,
}

/// A saved workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRecord {
  pub workflow_id: String,
  pub name: String,
  pub nodes: Json<serde_json::Value>,
  pub edges: Json<serde_json::Value>,
  /// Whether the external trigger endpoint may start this workflow.
  pub api_enabled: bool,
  pub api_key: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// One execution-history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
  pub execution_id: String,
  pub workflow_id: Option<String>,
  pub status: ExecutionStatus,
  pub input_data: String,
  pub final_output: Option<String>,
  pub trace: Json<serde_json::Value>,
  pub error_message: Option<String>,
  pub execution_time_ms: Option<i64>,
  pub triggered_by: TriggerSource,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
  /// Fresh `running` row for a newly dispatched execution.
  pub fn started(
    execution_id: impl Into<String>,
    workflow_id: Option<String>,
    input_data: impl Into<String>,
    triggered_by: TriggerSource,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id,
      status: ExecutionStatus::Running,
      input_data: input_data.into(),
      final_output: None,
      trace: Json(serde_json::Value::Array(Vec::new())),
      error_message: None,
      execution_time_ms: None,
      triggered_by,
      started_at: Utc::now(),
      completed_at: None,
    }
  }
}
