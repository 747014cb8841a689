//! Agent drivers and their shared plumbing.
//!
//! Agents read the assembly the executor attached to the context -
//! `knowledge` from connected memory nodes, `agent_tools` /
//! `agent_tool_nodes` from connected tool nodes, `agent_memory_nodes` /
//! `agent_memory_node_map` for LLM-driven memory writes - and may expose
//! them to the model as callable functions named `tool_<nodeId>` and
//! `memory_<nodeId>`. Tool calls re-enter the driver registry; memory
//! calls write through the shared store.

mod claude;
mod ollama;
mod openai;

pub use claude::ClaudeAgentDriver;
pub use ollama::OllamaAgentDriver;
pub use openai::OpenAiAgentDriver;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::context::Context;
use crate::registry::DriverRegistry;
use crate::response::DriverResponse;

/// Cap on model-driven tool-execution rounds per agent invocation.
pub(crate) const MAX_TOOL_ROUNDS: usize = 4;

/// Knowledge JSON appended to the system prompt is capped at this length.
const KNOWLEDGE_PROMPT_CAP: usize = 4000;

/// Python-style truthiness for loosely-typed node data values.
pub(crate) fn value_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}

/// Render the input slot as message text.
pub(crate) fn input_text(input: &Value) -> String {
  match input {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// System prompt: the node's configured prompt plus the supplemental
/// knowledge gathered from connected memory nodes.
pub(crate) fn build_system_prompt(
  node: &trellis_graph::Node,
  knowledge: Option<&Map<String, Value>>,
) -> String {
  let mut prompt = node
    .data_str("system")
    .filter(|s| !s.is_empty())
    .unwrap_or("You are a helpful assistant.")
    .to_string();

  if let Some(knowledge) = knowledge.filter(|k| !k.is_empty()) {
    let mut rendered = Value::Object(knowledge.clone()).to_string();
    if rendered.len() > KNOWLEDGE_PROMPT_CAP {
      let mut end = KNOWLEDGE_PROMPT_CAP;
      while !rendered.is_char_boundary(end) {
        end -= 1;
      }
      rendered.truncate(end);
    }
    prompt.push_str("\n\nSupplemental knowledge (JSON):\n");
    prompt.push_str(&rendered);
  }

  prompt
}

/// Temperature from node data, defaulting to 0.2.
pub(crate) fn temperature(node: &trellis_graph::Node) -> f64 {
  match node.data.get("temperature") {
    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.2),
    Some(Value::String(s)) => s.trim().parse().unwrap_or(0.2),
    _ => 0.2,
  }
}

/// Minimal non-conversational fallback when no provider is reachable:
/// pass the input through, preferring the last tool-produced string so
/// downstream nodes receive a clean value.
pub(crate) fn fallback_response(cx: &Context, tool_outputs: &[Value]) -> DriverResponse {
  let mut current = input_text(&cx.input);
  for output in tool_outputs {
    if let Value::String(s) = output {
      if !s.is_empty() {
        current = s.clone();
      }
    }
  }
  DriverResponse::output(Value::String(current))
}

/// Convert a hard provider failure into the response shape the executor
/// expects: soft (pass-through) when the node opts in via
/// `continue_on_error`, hard error otherwise.
pub(crate) fn provider_error_response(
  node: &trellis_graph::Node,
  cx: &Context,
  message: String,
) -> DriverResponse {
  if node.data_flag("continue_on_error") {
    DriverResponse {
      output: Some(cx.input.clone()),
      error: Some(message),
      error_type: Some("connection_error".to_string()),
      had_error: true,
      ..DriverResponse::default()
    }
  } else {
    let mut response = DriverResponse::error(message);
    response.output = Some(cx.input.clone());
    response.error_type = Some("connection_error".to_string());
    response
  }
}

/// One entry in the agent's tool-call log.
pub(crate) fn log_entry(name: &str, arguments: &Value, result: &Value) -> Value {
  json!({ "name": name, "arguments": arguments, "result": result })
}

/// Execute an LLM function call against the graph.
///
/// `tool_<nodeId>` re-enters the registry to run the connected tool node
/// with `input`/`params` overrides from the call arguments;
/// `memory_<nodeId>` applies a store write in one of the modes
/// `replace` (default), `append` (optionally de-duplicated), or `merge`.
/// Unknown names resolve to an error value handed back to the model.
pub(crate) async fn dispatch_function_call(
  registry: &DriverRegistry,
  cx: &Context,
  name: &str,
  arguments: &Value,
) -> Value {
  if let Some(node_id) = name.strip_prefix("tool_") {
    let Some(node) = cx.agent_tool_nodes.as_ref().and_then(|map| map.get(node_id)) else {
      return json!({ "error": format!("unknown tool node '{node_id}'") });
    };

    let mut tool_cx = cx.clone();
    if let Some(input) = arguments.get("input") {
      tool_cx.input = input.clone();
    }
    if let Some(Value::Object(params)) = arguments.get("params") {
      tool_cx.params = params.clone();
    }

    let result = registry.execute("tool", node, &tool_cx).await;
    return serde_json::to_value(&result).unwrap_or(Value::Null);
  }

  if let Some(node_id) = name.strip_prefix("memory_") {
    let Some(node) = cx.agent_memory_node_map.as_ref().and_then(|map| map.get(node_id)) else {
      return json!({ "error": format!("unknown memory node '{node_id}'") });
    };
    return apply_memory_write(registry, node, arguments).await;
  }

  warn!(name, "model called an unregistered function");
  json!({ "error": format!("unknown function '{name}'") })
}

async fn apply_memory_write(
  registry: &DriverRegistry,
  node: &trellis_graph::Node,
  arguments: &Value,
) -> Value {
  let key = node.data_str("key").unwrap_or("memory");
  let namespace = node.data_str("namespace").filter(|s| !s.is_empty()).unwrap_or("default");
  let store_key = format!("{namespace}:{key}");
  let value = arguments.get("value").cloned().unwrap_or(Value::Null);
  let mode = arguments.get("mode").and_then(Value::as_str).unwrap_or("replace");
  let dedupe = arguments.get("dedupe").map(value_truthy).unwrap_or(true);

  let store = registry.memory();
  let previous = store.get(&store_key).await;
  debug!(store_key, mode, "agent memory write");

  let stored = match mode {
    "append" => {
      let mut merged = match &previous {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
      };
      let incoming = match value {
        Value::Array(items) => items,
        single => vec![single],
      };
      for item in incoming {
        if !dedupe || !merged.contains(&item) {
          merged.push(item);
        }
      }
      Value::Array(merged)
    }
    "merge" => {
      let mut merged = match &previous {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
      };
      if let Value::Object(incoming) = value {
        merged.extend(incoming);
      }
      Value::Object(merged)
    }
    _ => value,
  };

  store.set(&store_key, stored.clone()).await;
  json!({ "status": "ok", "key": key, "namespace": namespace, "stored": stored })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::HashMap;
  use std::sync::Arc;
  use trellis_graph::Node;
  use trellis_memory::MemoryStore;

  fn node(raw: Value) -> Node {
    serde_json::from_value(raw).unwrap()
  }

  #[test]
  fn system_prompt_includes_knowledge() {
    let agent = node(json!({
      "id": "a", "type": "openai_agent",
      "data": { "system": "Only transform the input." }
    }));
    let knowledge = json!({ "k": "remembered" }).as_object().cloned().unwrap();
    let prompt = build_system_prompt(&agent, Some(&knowledge));
    assert!(prompt.starts_with("Only transform the input."));
    assert!(prompt.contains("remembered"));
  }

  #[test]
  fn fallback_prefers_last_tool_string() {
    let cx = Context { input: json!("original"), ..Context::default() };
    let response = fallback_response(&cx, &[json!("first"), json!(42), json!("LAST")]);
    assert_eq!(response.output, Some(json!("LAST")));
    assert!(response.is_ok());
  }

  #[tokio::test]
  async fn memory_function_append_mode_dedupes() {
    let store = Arc::new(MemoryStore::in_process());
    store.set("d:facts", json!(["a"])).await;
    let registry = DriverRegistry::with_defaults(store.clone());

    let memory_node = node(json!({
      "id": "m1", "type": "memory",
      "data": { "namespace": "d", "key": "facts" }
    }));
    let mut cx = Context::default();
    cx.agent_memory_node_map = Some(HashMap::from([("m1".to_string(), memory_node)]));

    let result = dispatch_function_call(
      &registry,
      &cx,
      "memory_m1",
      &json!({ "value": ["a", "b"], "mode": "append" }),
    )
    .await;
    assert_eq!(result["status"], "ok");
    assert_eq!(store.get("d:facts").await, Some(json!(["a", "b"])));
  }

  #[tokio::test]
  async fn tool_function_reenters_registry() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let tool_node = node(json!({
      "id": "t1", "type": "tool",
      "data": { "operation": "uppercase" }
    }));
    let mut cx = Context::default();
    cx.agent_tool_nodes = Some(HashMap::from([("t1".to_string(), tool_node)]));

    let result =
      dispatch_function_call(&registry, &cx, "tool_t1", &json!({ "input": "shout" })).await;
    assert_eq!(result["output"], "SHOUT");
  }

  #[tokio::test]
  async fn unknown_function_reports_error_value() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let result =
      dispatch_function_call(&registry, &Context::default(), "frobnicate", &json!({})).await;
    assert!(result["error"].as_str().unwrap().contains("unknown function"));
  }
}
