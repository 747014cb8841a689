use std::sync::Arc;

use serde_json::Value;
use trellis_progress::{
  BranchStatus, ExecutionCache, ExecutionStatus, TraceEntry,
};

/// Push-model progress hooks emitted by the kernel.
///
/// Every method is a no-op by default; the base kernel runs silently.
/// Implementations receive the full accumulated lists on each call so they
/// can persist a consistent snapshot without tracking state themselves.
pub trait ProgressReporter: Send + Sync + 'static {
  fn on_execution_start(&self, _total_nodes: usize, _start_node_id: Option<&str>) {}

  fn on_node_start(&self, _node_id: &str, _steps: usize) {}

  fn on_node_complete(
    &self,
    _entry: &TraceEntry,
    _completed_nodes: &[String],
    _error_nodes: &[String],
    _trace: &[TraceEntry],
    _steps: usize,
  ) {
  }

  fn on_execution_complete(
    &self,
    _final_value: &Value,
    _trace: &[TraceEntry],
    _completed_nodes: &[String],
    _steps: usize,
  ) {
  }

  fn on_execution_error(&self, _error: &str, _trace: &[TraceEntry], _error_nodes: &[String]) {}

  fn on_branch_status(&self, _branch_id: &str, _status: BranchStatus, _error: Option<&str>) {}
}

/// Discards all events. Used by the synchronous endpoint and by tests
/// that only care about the returned outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

/// Streams execution state into the shared cache so clients can poll
/// `GET /execution/<id>/status`.
///
/// Each hook performs one read-modify-write through
/// [`ExecutionCache::update`]; the cache serializes concurrent branch
/// updates under its lock.
pub struct PollingReporter {
  cache: Arc<ExecutionCache>,
  execution_id: String,
}

impl PollingReporter {
  pub fn new(cache: Arc<ExecutionCache>, execution_id: impl Into<String>) -> Self {
    Self { cache, execution_id: execution_id.into() }
  }
}

impl ProgressReporter for PollingReporter {
  fn on_execution_start(&self, total_nodes: usize, start_node_id: Option<&str>) {
    self.cache.update(&self.execution_id, |state| {
      state.status = ExecutionStatus::Running;
      state.total_nodes = Some(total_nodes);
      state.start_node_id = start_node_id.map(str::to_string);
      state.current_node_id = None;
      state.completed_nodes.clear();
      state.error_nodes.clear();
      state.trace.clear();
      state.steps = 0;
      state.final_value = Value::Null;
      state.error = None;
    });
  }

  fn on_node_start(&self, node_id: &str, steps: usize) {
    self.cache.update(&self.execution_id, |state| {
      state.current_node_id = Some(node_id.to_string());
      state.steps = steps;
    });
  }

  fn on_node_complete(
    &self,
    _entry: &TraceEntry,
    completed_nodes: &[String],
    error_nodes: &[String],
    trace: &[TraceEntry],
    steps: usize,
  ) {
    self.cache.update(&self.execution_id, |state| {
      state.current_node_id = None;
      state.completed_nodes = completed_nodes.to_vec();
      state.error_nodes = error_nodes.to_vec();
      state.trace = trace.to_vec();
      state.steps = steps;
    });
  }

  fn on_execution_complete(
    &self,
    final_value: &Value,
    trace: &[TraceEntry],
    completed_nodes: &[String],
    steps: usize,
  ) {
    self.cache.update(&self.execution_id, |state| {
      state.status = ExecutionStatus::Completed;
      state.final_value = final_value.clone();
      state.trace = trace.to_vec();
      state.completed_nodes = completed_nodes.to_vec();
      state.steps = steps;
      state.current_node_id = None;
    });
  }

  fn on_execution_error(&self, error: &str, trace: &[TraceEntry], error_nodes: &[String]) {
    self.cache.update(&self.execution_id, |state| {
      state.status = ExecutionStatus::Error;
      state.error = Some(error.to_string());
      state.trace = trace.to_vec();
      state.error_nodes = error_nodes.to_vec();
      state.current_node_id = None;
    });
  }

  fn on_branch_status(&self, branch_id: &str, status: BranchStatus, error: Option<&str>) {
    self.cache.update(&self.execution_id, |state| {
      state
        .parallel_status
        .get_or_insert_with(Default::default)
        .insert(branch_id.to_string(), status);
      if let Some(error) = error {
        state.error = Some(error.to_string());
      }
    });
  }
}
