//! Trellis Store
//!
//! Persistence for saved workflows and execution history. The API-key
//! trigger endpoint reads workflows from here; the async dispatcher writes
//! a history row per execution and updates it when the run finishes.
//!
//! The [`Store`] trait defines the operations; [`SqliteStore`] is the
//! bundled implementation. In-flight execution state never lives here -
//! that is the progress cache's job.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{ExecutionRecord, ExecutionStatus, TriggerSource, WorkflowRecord};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for workflows and execution history.
#[async_trait]
pub trait Store: Send + Sync {
  /// Persist a workflow definition.
  async fn create_workflow(&self, workflow: &WorkflowRecord) -> Result<(), Error>;

  /// Fetch a workflow by id.
  async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, Error>;

  /// Create an execution-history row.
  async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), Error>;

  /// Fetch an execution-history row by execution id.
  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, Error>;

  /// Record the outcome of a finished execution.
  async fn finish_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    final_output: Option<String>,
    trace: serde_json::Value,
    error_message: Option<String>,
    execution_time_ms: i64,
  ) -> Result<(), Error>;

  /// List execution history for a workflow, newest first.
  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>, Error>;
}
