use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_drivers::DriverResponse;

/// Lifecycle of an asynchronous execution as seen by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Error,
}

/// Lifecycle of one parallel branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
  Queued,
  Running,
  Ok,
  Error,
}

/// The slice of context recorded per trace entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
  #[serde(default)]
  pub input: Value,
}

/// One executed step: which node ran, what the driver returned, and where
/// the walk went next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
  pub node_id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  pub result: DriverResponse,
  pub context: TraceContext,
  pub edge_id: Option<String>,
  pub next_node_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub used_memory: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub used_tools: Option<Vec<String>>,
}

/// Progress record persisted to the cache for polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
  pub status: ExecutionStatus,
  pub current_node_id: Option<String>,
  pub completed_nodes: Vec<String>,
  pub error_nodes: Vec<String>,
  pub trace: Vec<TraceEntry>,
  pub steps: usize,
  #[serde(rename = "final")]
  pub final_value: Value,
  pub error: Option<String>,
  /// Seconds since the epoch of the last update.
  pub timestamp: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parallel_status: Option<BTreeMap<String, BranchStatus>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_nodes: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_node_id: Option<String>,
}

impl ExecutionState {
  /// Fresh `running` record.
  pub fn running() -> Self {
    Self {
      status: ExecutionStatus::Running,
      current_node_id: None,
      completed_nodes: Vec::new(),
      error_nodes: Vec::new(),
      trace: Vec::new(),
      steps: 0,
      final_value: Value::Null,
      error: None,
      timestamp: epoch_seconds(),
      parallel_status: None,
      total_nodes: None,
      start_node_id: None,
    }
  }

  pub fn touch(&mut self) {
    self.timestamp = epoch_seconds();
  }

  pub fn is_terminal(&self) -> bool {
    self.status != ExecutionStatus::Running
  }
}

pub(crate) fn epoch_seconds() -> f64 {
  SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn state_serializes_with_wire_names() {
    let mut state = ExecutionState::running();
    state.completed_nodes.push("n1".into());
    state.final_value = json!("done");
    let wire = serde_json::to_value(&state).unwrap();
    assert_eq!(wire["status"], "running");
    assert_eq!(wire["completedNodes"], json!(["n1"]));
    assert_eq!(wire["final"], "done");
    assert!(wire["timestamp"].as_f64().unwrap() > 0.0);
  }

  #[test]
  fn trace_entry_round_trips() {
    let entry = TraceEntry {
      node_id: "a".into(),
      node_type: "input".into(),
      result: DriverResponse::output(json!("hi")),
      context: TraceContext { input: json!("hi") },
      edge_id: Some("e1".into()),
      next_node_id: Some("b".into()),
      used_memory: None,
      used_tools: None,
    };
    let wire = serde_json::to_value(&entry).unwrap();
    assert_eq!(wire["nodeId"], "a");
    assert_eq!(wire["nextNodeId"], "b");
    let back: TraceEntry = serde_json::from_value(wire).unwrap();
    assert_eq!(back, entry);
  }
}
