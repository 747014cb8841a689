use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};
use trellis_graph::Node;

use crate::context::Context;
use crate::drivers::loop_node::find_handle_edge;
use crate::drivers::subwalk::execute_body;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Array loop with dual output handles (`body` / `exit`): runs the body
/// sub-graph once per input element.
///
/// Configuration (`node.data`): `item_var` (default `item`),
/// `collect_results` (default true), `max_iterations` (default 1000).
pub struct ForEachDriver;

#[async_trait]
impl Driver for ForEachDriver {
  fn type_name(&self) -> &'static str {
    "for_each"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let Some(items) = cx.input.as_array() else {
      return DriverResponse::error(format!(
        "For Each requires an array input, got {}",
        value_kind(&cx.input)
      ));
    };

    let item_var = node.data_str("item_var").unwrap_or("item").to_string();
    let collect_results =
      node.data.get("collect_results").map(crate::agents::value_truthy).unwrap_or(true);
    let max_iterations = node.data_i64("max_iterations").unwrap_or(1000).max(0) as usize;

    if cx.graph.is_none() {
      return DriverResponse::error("For Each requires graph structure in the execution context");
    }

    let body_edge = find_handle_edge(node, cx, "body");
    let exit_edge = find_handle_edge(node, cx, "exit");

    let Some(body_edge) = body_edge else {
      warn!(node_id = %node.id, "for_each node has no body edge, passing through");
      return DriverResponse::output(cx.input.clone()).with_route("exit");
    };
    let stop_at = exit_edge.as_ref().map(|edge| edge.target.clone());

    let items: Vec<Value> = items.iter().take(max_iterations).cloned().collect();
    let total = items.len();
    info!(node_id = %node.id, total, max_iterations, "for_each start");

    let mut results: Vec<Value> = Vec::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
      let mut iter_cx = cx.clone();
      iter_cx.input = item.clone();
      iter_cx.extras.insert(item_var.clone(), item);
      iter_cx.extras.insert("loop_index".into(), json!(index));
      iter_cx.extras.insert("loop_total".into(), json!(total));
      iter_cx.extras.insert("is_first".into(), json!(index == 0));
      iter_cx.extras.insert("is_last".into(), json!(index + 1 == total));

      match execute_body(registry, &mut iter_cx, &body_edge.target, stop_at.as_deref()).await {
        Ok(body_output) => {
          if collect_results {
            results.push(body_output);
          }
        }
        Err(message) => {
          return DriverResponse::error(format!("Loop iteration {index} failed: {message}"))
            .with_extra("iteration", json!(index))
            .with_extra("partial_results", Value::Array(results));
        }
      }
    }

    let iterations = results.len();
    let output = if collect_results { Value::Array(results) } else { cx.input.clone() };
    info!(node_id = %node.id, iterations, "for_each completed");

    DriverResponse::output(output)
      .with_route("exit")
      .with_extra("iterations", json!(iterations))
  }
}

fn value_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use trellis_graph::{Edge, GraphIndex};
  use trellis_memory::MemoryStore;

  fn graph_cx(nodes: Vec<Node>, edges: Vec<Edge>, input: Value) -> Context {
    Context {
      input,
      graph: Some(Arc::new(GraphIndex::new(&nodes, &edges))),
      ..Context::default()
    }
  }

  fn node(raw: Value) -> Node {
    serde_json::from_value(raw).unwrap()
  }

  fn edge(raw: Value) -> Edge {
    serde_json::from_value(raw).unwrap()
  }

  #[tokio::test]
  async fn runs_body_per_item_and_collects() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let nodes = vec![
      node(json!({ "id": "fe", "type": "for_each", "data": {} })),
      node(json!({ "id": "up", "type": "tool", "data": { "operation": "uppercase" } })),
    ];
    let edges = vec![edge(json!({
      "id": "e1", "source": "fe", "target": "up", "sourceHandle": "body"
    }))];
    let cx = graph_cx(nodes.clone(), edges, json!(["a", "b"]));

    let response = registry.execute("for_each", &nodes[0], &cx).await;
    assert!(response.is_ok());
    assert_eq!(response.route.as_deref(), Some("exit"));
    assert_eq!(response.output, Some(json!(["A", "B"])));
  }

  #[tokio::test]
  async fn non_array_input_is_an_error() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let fe = node(json!({ "id": "fe", "type": "for_each", "data": {} }));
    let cx = graph_cx(vec![fe.clone()], vec![], json!("scalar"));
    let response = registry.execute("for_each", &fe, &cx).await;
    assert!(!response.is_ok());
    assert!(response.error.as_deref().unwrap().contains("array"));
  }

  #[tokio::test]
  async fn missing_body_edge_passes_through() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let fe = node(json!({ "id": "fe", "type": "for_each", "data": {} }));
    let cx = graph_cx(vec![fe.clone()], vec![], json!([1, 2]));
    let response = registry.execute("for_each", &fe, &cx).await;
    assert!(response.is_ok());
    assert_eq!(response.output, Some(json!([1, 2])));
    assert_eq!(response.route.as_deref(), Some("exit"));
  }

  #[tokio::test]
  async fn max_iterations_bounds_the_walk() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let nodes = vec![
      node(json!({ "id": "fe", "type": "for_each", "data": { "max_iterations": 2 } })),
      node(json!({ "id": "up", "type": "tool", "data": { "operation": "uppercase" } })),
    ];
    let edges = vec![edge(json!({
      "id": "e1", "source": "fe", "target": "up", "sourceHandle": "body"
    }))];
    let cx = graph_cx(nodes.clone(), edges, json!(["a", "b", "c", "d"]));

    let response = registry.execute("for_each", &nodes[0], &cx).await;
    assert_eq!(response.output, Some(json!(["A", "B"])));
  }
}
