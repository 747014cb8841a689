use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::types::{ExecutionRecord, ExecutionStatus, WorkflowRecord};
use crate::{Error, Store};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Connect and create the schema if missing.
  ///
  /// SQLite allows a single writer; one pooled connection keeps `:memory:`
  /// databases coherent and avoids writer contention on files.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new().max_connections(1).connect(url).await?;
    let store = Self { pool };
    store.init_schema().await?;
    Ok(store)
  }

  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Idempotent schema bootstrap.
  pub async fn init_schema(&self) -> Result<(), Error> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS workflows (
                workflow_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                nodes TEXT NOT NULL,
                edges TEXT NOT NULL,
                api_enabled INTEGER NOT NULL DEFAULT 0,
                api_key TEXT,
                created_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                execution_id TEXT PRIMARY KEY,
                workflow_id TEXT,
                status TEXT NOT NULL,
                input_data TEXT NOT NULL,
                final_output TEXT,
                trace TEXT NOT NULL,
                error_message TEXT,
                execution_time_ms INTEGER,
                triggered_by TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_workflow(&self, workflow: &WorkflowRecord) -> Result<(), Error> {
    sqlx::query(
            r#"
            INSERT INTO workflows (workflow_id, name, nodes, edges, api_enabled, api_key, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow.workflow_id)
        .bind(&workflow.name)
        .bind(&workflow.nodes)
        .bind(&workflow.edges)
        .bind(workflow.api_enabled)
        .bind(&workflow.api_key)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await?;

    Ok(())
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT workflow_id, name, nodes, edges, api_enabled, api_key, created_at
            FROM workflows
            WHERE workflow_id = ?
            "#,
    )
    .bind(workflow_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))
  }

  async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), Error> {
    sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (execution_id, workflow_id, status, input_data, final_output, trace,
                 error_message, execution_time_ms, triggered_by, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.execution_id)
        .bind(&execution.workflow_id)
        .bind(execution.status)
        .bind(&execution.input_data)
        .bind(&execution.final_output)
        .bind(&execution.trace)
        .bind(&execution.error_message)
        .bind(execution.execution_time_ms)
        .bind(execution.triggered_by)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;

    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, status, input_data, final_output, trace,
                   error_message, execution_time_ms, triggered_by, started_at, completed_at
            FROM workflow_executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("execution {execution_id}")))
  }

  async fn finish_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    final_output: Option<String>,
    trace: serde_json::Value,
    error_message: Option<String>,
    execution_time_ms: i64,
  ) -> Result<(), Error> {
    sqlx::query(
      r#"
            UPDATE workflow_executions
            SET status = ?, final_output = ?, trace = ?, error_message = ?,
                execution_time_ms = ?, completed_at = ?
            WHERE execution_id = ?
            "#,
    )
    .bind(status)
    .bind(final_output)
    .bind(sqlx::types::Json(trace))
    .bind(error_message)
    .bind(execution_time_ms)
    .bind(Utc::now())
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
    sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, status, input_data, final_output, trace,
                   error_message, execution_time_ms, triggered_by, started_at, completed_at
            FROM workflow_executions
            WHERE workflow_id = ?
            ORDER BY started_at DESC
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await
    .map_err(Error::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TriggerSource;
  use serde_json::json;

  async fn store() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:").await.expect("in-memory store")
  }

  fn workflow(id: &str, api_enabled: bool) -> WorkflowRecord {
    WorkflowRecord {
      workflow_id: id.to_string(),
      name: "demo".to_string(),
      nodes: sqlx::types::Json(json!([{ "id": "1", "type": "input", "data": {} }])),
      edges: sqlx::types::Json(json!([])),
      api_enabled,
      api_key: api_enabled.then(|| "secret".to_string()),
      created_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn workflow_round_trip() {
    let store = store().await;
    store.create_workflow(&workflow("wf-1", true)).await.unwrap();

    let loaded = store.get_workflow("wf-1").await.unwrap();
    assert_eq!(loaded.name, "demo");
    assert!(loaded.api_enabled);
    assert_eq!(loaded.api_key.as_deref(), Some("secret"));
    assert_eq!(loaded.nodes.0[0]["type"], "input");

    assert!(matches!(store.get_workflow("ghost").await, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn execution_lifecycle() {
    let store = store().await;
    store.create_workflow(&workflow("wf-1", false)).await.unwrap();

    let record = ExecutionRecord::started(
      "exec-1",
      Some("wf-1".to_string()),
      "\"hello\"",
      TriggerSource::Manual,
    );
    store.create_execution(&record).await.unwrap();

    let running = store.get_execution("exec-1").await.unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);
    assert!(running.completed_at.is_none());

    store
      .finish_execution(
        "exec-1",
        ExecutionStatus::Completed,
        Some("\"done\"".to_string()),
        json!([{ "nodeId": "1" }]),
        None,
        128,
      )
      .await
      .unwrap();

    let finished = store.get_execution("exec-1").await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.final_output.as_deref(), Some("\"done\""));
    assert_eq!(finished.execution_time_ms, Some(128));
    assert!(finished.completed_at.is_some());

    let history = store.list_executions("wf-1").await.unwrap();
    assert_eq!(history.len(), 1);
  }
}
