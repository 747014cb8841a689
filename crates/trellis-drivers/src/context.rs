use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trellis_graph::{GraphIndex, Node};

/// Tool node summary exposed to agent drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
  #[serde(rename = "nodeId")]
  pub node_id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operation: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arg: Option<Value>,
}

/// Memory node summary exposed to agent drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySpec {
  #[serde(rename = "nodeId")]
  pub node_id: String,
  pub key: String,
  pub namespace: String,
}

/// Per-execution context threaded through the step loop.
///
/// Single-threaded within an execution except inside parallel branches,
/// each of which works on its own clone (`Clone` deep-copies `state`, which
/// is exactly the branch-isolation contract). The `knowledge` / `agent_*`
/// fields are populated by agent-context assembly just before an
/// agent-typed node runs and are absent otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
  #[serde(default)]
  pub input: Value,
  #[serde(default)]
  pub params: Map<String, Value>,
  #[serde(default)]
  pub condition: bool,
  #[serde(default)]
  pub state: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parallel_results: Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub knowledge: Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_tools: Option<Vec<ToolSpec>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_tool_nodes: Option<HashMap<String, Node>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_memory_nodes: Option<Vec<MemorySpec>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_memory_node_map: Option<HashMap<String, Node>>,
  /// Driver-specific keys (explicit `value` for memory writes, loop
  /// counter variables, ...). Preserved on the wire.
  #[serde(flatten)]
  pub extras: Map<String, Value>,
  /// Graph handle for drivers that sub-walk (loops). Never serialized.
  #[serde(skip)]
  pub graph: Option<Arc<GraphIndex>>,
}

impl Context {
  /// True when the input slot carries nothing a start node should keep.
  pub fn input_is_empty(&self) -> bool {
    match &self.input {
      Value::Null => true,
      Value::String(s) => s.is_empty(),
      _ => false,
    }
  }

  /// Strip agent-assembly fields, e.g. before handing the context to a
  /// fresh branch.
  pub fn without_agent_fields(mut self) -> Self {
    self.knowledge = None;
    self.agent_tools = None;
    self.agent_tool_nodes = None;
    self.agent_memory_nodes = None;
    self.agent_memory_node_map = None;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn deserializes_from_client_payload() {
    let cx: Context = serde_json::from_value(json!({
      "input": "hi",
      "condition": true,
      "params": { "tier": "premium" },
      "state": { "count": 2 },
      "value": "explicit"
    }))
    .unwrap();
    assert_eq!(cx.input, json!("hi"));
    assert!(cx.condition);
    assert_eq!(cx.extras.get("value"), Some(&json!("explicit")));
  }

  #[test]
  fn empty_input_detection() {
    assert!(Context::default().input_is_empty());
    let cx = Context { input: json!(""), ..Context::default() };
    assert!(cx.input_is_empty());
    let cx = Context { input: json!(0), ..Context::default() };
    assert!(!cx.input_is_empty());
  }
}
