use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::registry::DriverRegistry;

/// Budget for a single loop-body walk, independent of the outer step loop.
const MAX_BODY_STEPS: usize = 100;

/// Walk a loop body inline: start at `start_node_id`, follow first outgoing
/// edges, and stop at the designated exit node, an `output` node, a
/// `loop_end` marker, or a dead end.
///
/// Mutates the iteration context in place (`input` chains through body
/// nodes, `state` is replaced by driver-returned state) and returns the
/// final input value. A body node failure aborts the iteration.
pub(crate) async fn execute_body(
  registry: &DriverRegistry,
  cx: &mut Context,
  start_node_id: &str,
  stop_at_node_id: Option<&str>,
) -> Result<Value, String> {
  let graph = cx.graph.clone().ok_or_else(|| "loop body requires a graph handle".to_string())?;

  let mut current_id = start_node_id.to_string();
  let mut steps = 0;

  while steps < MAX_BODY_STEPS {
    if stop_at_node_id == Some(current_id.as_str()) {
      debug!(node_id = %current_id, "loop body reached exit node");
      break;
    }

    let Some(node) = graph.node(&current_id) else {
      warn!(node_id = %current_id, "loop body node not found");
      break;
    };

    if node.node_type == "output" || node.node_type == "loop_end" {
      break;
    }

    debug!(node_id = %current_id, node_type = %node.node_type, "loop body step");
    let result = registry.execute(&node.node_type, node, cx).await;
    if !result.is_ok() {
      let message = result.error.unwrap_or_else(|| "node execution failed".to_string());
      return Err(format!("Node {current_id} failed: {message}"));
    }

    if let Some(output) = result.output {
      cx.input = output;
    }
    if let Some(state) = result.state {
      cx.state = state;
    }

    match graph.outgoing(&current_id).first() {
      Some(edge) => current_id = edge.target.clone(),
      None => {
        debug!(node_id = %current_id, "loop body ended, no outgoing edges");
        break;
      }
    }
    steps += 1;
  }

  if steps >= MAX_BODY_STEPS {
    warn!("loop body hit max steps ({MAX_BODY_STEPS})");
  }

  Ok(cx.input.clone())
}
