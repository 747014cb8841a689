use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};
use trellis_graph::{Edge, Node};

use crate::context::Context;
use crate::drivers::subwalk::execute_body;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Counter loop with dual output handles: `body` connects to the loop body
/// start, `exit` to the post-loop continuation.
///
/// Configuration (`node.data`): `iterations` (0..=10000), `counter_var`
/// (default `i`), `start_from` (default 0), `pass_through` (default true -
/// each iteration's output becomes the next iteration's input).
pub struct LoopDriver;

#[async_trait]
impl Driver for LoopDriver {
  fn type_name(&self) -> &'static str {
    "loop"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let iterations = node.data_i64("iterations").unwrap_or(1);
    if iterations < 0 {
      return DriverResponse::error("Iterations must be non-negative");
    }
    if iterations > 10_000 {
      return DriverResponse::error("Iterations cannot exceed 10,000");
    }

    let counter_var = node.data_str("counter_var").unwrap_or("i").to_string();
    let start_from = node.data_i64("start_from").unwrap_or(0);
    let pass_through = node.data.get("pass_through").map(crate::agents::value_truthy).unwrap_or(true);

    if cx.graph.is_none() {
      return DriverResponse::error("Loop requires graph structure in the execution context");
    }

    let body_edge = find_handle_edge(node, cx, "body");
    let exit_edge = find_handle_edge(node, cx, "exit");

    let Some(body_edge) = body_edge else {
      warn!(node_id = %node.id, "loop node has no body edge, passing through");
      return DriverResponse::output(cx.input.clone()).with_route("exit");
    };
    let stop_at = exit_edge.as_ref().map(|edge| edge.target.clone());

    info!(node_id = %node.id, iterations, start_from, "loop start");

    let mut chained = cx.input.clone();
    let mut collected: Vec<Value> = Vec::new();

    for counter in start_from..start_from + iterations {
      let index = counter - start_from;
      let mut iter_cx = cx.clone();
      iter_cx.input = if pass_through { chained.clone() } else { cx.input.clone() };
      iter_cx.extras.insert(counter_var.clone(), json!(counter));
      iter_cx.extras.insert("loop_index".into(), json!(index));
      iter_cx.extras.insert("loop_counter".into(), json!(counter));
      iter_cx.extras.insert("loop_total".into(), json!(iterations));
      iter_cx.extras.insert("is_first".into(), json!(counter == start_from));
      iter_cx
        .extras
        .insert("is_last".into(), json!(counter == start_from + iterations - 1));

      match execute_body(registry, &mut iter_cx, &body_edge.target, stop_at.as_deref()).await {
        Ok(body_output) => {
          if pass_through {
            chained = body_output;
          } else {
            collected.push(body_output);
          }
        }
        Err(message) => {
          let partial =
            if pass_through { chained.clone() } else { Value::Array(collected.clone()) };
          return DriverResponse::error(format!("Loop iteration {counter} failed: {message}"))
            .with_extra("iteration", json!(counter))
            .with_extra("partial_results", partial);
        }
      }
    }

    let output = if pass_through { chained } else { Value::Array(collected) };
    info!(node_id = %node.id, iterations, "loop completed");

    DriverResponse::output(output)
      .with_route("exit")
      .with_extra("iterations", json!(iterations))
  }
}

/// Outgoing edge of `node` whose source handle matches `handle`.
pub(crate) fn find_handle_edge(node: &Node, cx: &Context, handle: &str) -> Option<Edge> {
  cx.graph
    .as_ref()?
    .outgoing(&node.id)
    .iter()
    .find(|edge| edge.source_handle.as_deref() == Some(handle))
    .cloned()
}
