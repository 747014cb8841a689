//! Agent context assembly.
//!
//! Before an agent-typed node runs, every edge incident to it (either
//! direction) is scanned for side-channel neighbors: memory nodes feed
//! `knowledge` (read through the shared store) and the memory-function
//! specs; tool nodes feed the callable tool specs. The returned id lists
//! land in the trace as `usedMemory`/`usedTools`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use trellis_drivers::{Context, MemorySpec, ToolSpec};
use trellis_graph::{GraphIndex, Node};
use trellis_memory::MemoryStore;

pub(crate) async fn build_agent_context(
  node: &Node,
  cx: &Context,
  graph: &Arc<GraphIndex>,
  memory: &Arc<MemoryStore>,
) -> (Context, Vec<String>, Vec<String>) {
  let mut exec_cx = cx.clone();
  let mut used_memory: Vec<String> = Vec::new();
  let mut used_tools: Vec<String> = Vec::new();
  let mut knowledge: Map<String, Value> = Map::new();
  let mut tool_specs: Vec<ToolSpec> = Vec::new();
  let mut tool_nodes: HashMap<String, Node> = HashMap::new();
  let mut memory_specs: Vec<MemorySpec> = Vec::new();
  let mut memory_nodes: HashMap<String, Node> = HashMap::new();

  for edge in graph.edges() {
    let other_id = if edge.source == node.id {
      &edge.target
    } else if edge.target == node.id {
      &edge.source
    } else {
      continue;
    };
    let Some(other) = graph.node(other_id) else {
      continue;
    };

    match other.node_type.as_str() {
      "memory" => {
        let key = other.data_str("key").unwrap_or("memory").to_string();
        let namespace =
          other.data_str("namespace").filter(|s| !s.is_empty()).unwrap_or("default").to_string();
        let value = memory.get(&format!("{namespace}:{key}")).await;
        knowledge.insert(key.clone(), value.unwrap_or(Value::Null));
        used_memory.push(other.id.clone());
        memory_specs.push(MemorySpec { node_id: other.id.clone(), key, namespace });
        memory_nodes.insert(other.id.clone(), other.clone());
      }
      "tool" => {
        tool_specs.push(ToolSpec {
          node_id: other.id.clone(),
          name: other
            .data_str("label")
            .map(str::to_string)
            .unwrap_or_else(|| format!("Tool {}", other.id)),
          operation: other.data_str("operation").map(str::to_string),
          arg: other.data.get("arg").cloned(),
        });
        tool_nodes.insert(other.id.clone(), other.clone());
        used_tools.push(other.id.clone());
      }
      _ => {}
    }
  }

  debug!(
    node_id = %node.id,
    memory_nodes = used_memory.len(),
    tool_nodes = used_tools.len(),
    "assembled agent context"
  );

  if !knowledge.is_empty() {
    exec_cx.knowledge = Some(knowledge);
  }
  if !tool_specs.is_empty() {
    exec_cx.agent_tools = Some(tool_specs);
    exec_cx.agent_tool_nodes = Some(tool_nodes);
  }
  if !memory_specs.is_empty() {
    exec_cx.agent_memory_nodes = Some(memory_specs);
    exec_cx.agent_memory_node_map = Some(memory_nodes);
  }

  (exec_cx, used_memory, used_tools)
}
