use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Tool node: a small configured operation over the current input.
///
/// Invoked by the executor when a tool node sits on the control path, and
/// by agent drivers when the LLM calls the `tool_<nodeId>` function exposed
/// for a connected tool node.
///
/// Operations: `uppercase`, `lowercase`, `append` (with `arg`),
/// `save_memory`/`set_memory`/`append_memory` (persist to the memory
/// store; append de-duplicates while preserving order), and an `echo`
/// fallback that reflects the params.
pub struct ToolDriver;

#[async_trait]
impl Driver for ToolDriver {
  fn type_name(&self) -> &'static str {
    "tool"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let operation = node.data_str("operation").unwrap_or("echo");
    let tool_name = node.data_str("label").unwrap_or("Tool").to_string();
    debug!(node = %node.id, operation, "tool node");

    if matches!(operation, "save_memory" | "set_memory" | "append_memory") {
      return execute_memory_op(node, cx, registry, operation, &tool_name).await;
    }

    let arg = node.data_str("arg").unwrap_or("");
    let output = match (operation, cx.input.as_str()) {
      ("uppercase", Some(text)) => json!(text.to_uppercase()),
      ("lowercase", Some(text)) => json!(text.to_lowercase()),
      ("append", Some(text)) => json!(format!("{text}{arg}")),
      _ => json!({ "echo": cx.params }),
    };

    DriverResponse::output(output).with_extra("tool", json!(tool_name))
  }
}

/// Persist a value into the memory store. Key and namespace come from
/// `context.params` overrides first, then the node's defaults; the value
/// is `params.value` or the current input.
async fn execute_memory_op(
  node: &Node,
  cx: &Context,
  registry: &DriverRegistry,
  operation: &str,
  tool_name: &str,
) -> DriverResponse {
  let param_str = |key: &str| cx.params.get(key).and_then(Value::as_str);
  let key = param_str("key").or_else(|| node.data_str("key")).unwrap_or("memory");
  let namespace =
    param_str("namespace").or_else(|| node.data_str("namespace")).unwrap_or("default");
  let value = cx.params.get("value").cloned().unwrap_or_else(|| cx.input.clone());
  let append = operation == "append_memory"
    || cx.params.get("append").map(crate::agents::value_truthy).unwrap_or(false);

  let store_key = format!("{namespace}:{key}");
  let store = registry.memory();
  let previous = store.get(&store_key).await;

  let stored = if append {
    let mut merged = match &previous {
      Some(Value::Array(items)) => items.clone(),
      _ => Vec::new(),
    };
    let incoming = match value {
      Value::Array(items) => items,
      single => vec![single],
    };
    for item in incoming {
      if !merged.contains(&item) {
        merged.push(item);
      }
    }
    let merged = Value::Array(merged);
    store.set(&store_key, merged.clone()).await;
    merged
  } else {
    store.set(&store_key, value.clone()).await;
    value
  };

  DriverResponse::output(cx.input.clone())
    .with_extra("tool", json!(tool_name))
    .with_extra("operation", json!(operation))
    .with_extra("key", json!(key))
    .with_extra("namespace", json!(namespace))
    .with_extra("previous", previous.unwrap_or(Value::Null))
    .with_extra("stored", stored)
}
