use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A workflow node as submitted by clients.
///
/// `data` holds type-specific configuration (model name, expression,
/// merge strategy, ...). Nodes are immutable during an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub data: Map<String, Value>,
}

impl Node {
  /// Look up a string field in the node's configuration.
  pub fn data_str(&self, key: &str) -> Option<&str> {
    self.data.get(key).and_then(Value::as_str)
  }

  /// Look up a boolean flag in the node's configuration.
  ///
  /// Accepts JSON booleans as well as the common truthy spellings
  /// clients send (`"true"`, `1`).
  pub fn data_flag(&self, key: &str) -> bool {
    match self.data.get(key) {
      Some(Value::Bool(b)) => *b,
      Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
      Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
      _ => false,
    }
  }

  /// Look up an integer field in the node's configuration.
  ///
  /// Numeric strings are accepted because graph editors round-trip
  /// everything through text inputs.
  pub fn data_i64(&self, key: &str) -> Option<i64> {
    match self.data.get(key) {
      Some(Value::Number(n)) => n.as_i64(),
      Some(Value::String(s)) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// Display label for logs, falling back to the node id.
  pub fn label(&self) -> &str {
    self.data_str("label").unwrap_or(&self.id)
  }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  #[serde(default)]
  pub id: String,
  pub source: String,
  pub target: String,
  #[serde(rename = "sourceHandle", skip_serializing_if = "Option::is_none")]
  pub source_handle: Option<String>,
  #[serde(rename = "targetHandle", skip_serializing_if = "Option::is_none")]
  pub target_handle: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn node_with(data: Value) -> Node {
    serde_json::from_value(json!({ "id": "n1", "type": "tool", "data": data })).unwrap()
  }

  #[test]
  fn data_flag_accepts_truthy_spellings() {
    assert!(node_with(json!({ "continue_on_error": true })).data_flag("continue_on_error"));
    assert!(node_with(json!({ "continue_on_error": "true" })).data_flag("continue_on_error"));
    assert!(node_with(json!({ "continue_on_error": 1 })).data_flag("continue_on_error"));
    assert!(!node_with(json!({ "continue_on_error": false })).data_flag("continue_on_error"));
    assert!(!node_with(json!({})).data_flag("continue_on_error"));
  }

  #[test]
  fn data_i64_parses_numeric_strings() {
    assert_eq!(node_with(json!({ "iterations": "3" })).data_i64("iterations"), Some(3));
    assert_eq!(node_with(json!({ "iterations": 5 })).data_i64("iterations"), Some(5));
    assert_eq!(node_with(json!({})).data_i64("iterations"), None);
  }

  #[test]
  fn edge_round_trips_camel_case_handles() {
    let edge: Edge = serde_json::from_value(json!({
      "id": "e1",
      "source": "a",
      "target": "b",
      "sourceHandle": "yes"
    }))
    .unwrap();
    assert_eq!(edge.source_handle.as_deref(), Some("yes"));
    let back = serde_json::to_value(&edge).unwrap();
    assert_eq!(back["sourceHandle"], "yes");
  }
}
