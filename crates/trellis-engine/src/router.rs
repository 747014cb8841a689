//! Next-edge selection.
//!
//! Edges into `memory`/`tool` nodes are side channels and never routed.
//! Router and condition nodes follow the handle matching their `route`;
//! loop nodes follow `body`/`exit`; everything else prefers explicit
//! data-flow handles, then ranks candidate targets by type priority.

use trellis_graph::{Edge, GraphIndex, Node, is_agent_type};

use trellis_drivers::DriverResponse;

/// Handle ids that mark the plain data-flow port on multi-port nodes.
const PREFERRED_HANDLES: [&str; 4] = ["s", "out", "write", "default"];

/// Pick the edge to follow out of `current`, returning the next node and
/// the edge used. `(None, None)` halts the walk.
pub(crate) fn select_next_node<'g>(
  current: &Node,
  result: &DriverResponse,
  graph: &'g GraphIndex,
) -> (Option<&'g Node>, Option<&'g Edge>) {
  let outs = graph.control_flow_outgoing(&current.id);
  if outs.is_empty() {
    return (None, None);
  }

  match current.node_type.as_str() {
    "router" | "condition" | "loop" | "for_each" => select_routed_edge(result, &outs, graph),
    _ => select_preferred_edge(&outs, graph),
  }
}

/// Follow the edge whose source handle matches the driver's route,
/// falling back to the first control-flow edge.
fn select_routed_edge<'g>(
  result: &DriverResponse,
  outs: &[&'g Edge],
  graph: &'g GraphIndex,
) -> (Option<&'g Node>, Option<&'g Edge>) {
  if let Some(route) = result.route.as_deref() {
    for &edge in outs {
      if edge.source_handle.as_deref() == Some(route) {
        if let Some(next) = graph.node(&edge.target) {
          return (Some(next), Some(edge));
        }
      }
    }
  }
  let first = outs[0];
  (graph.node(&first.target), Some(first))
}

/// Prefer explicit data-flow handles; with several anonymous candidates,
/// rank targets by type priority and keep submission order among ties.
fn select_preferred_edge<'g>(
  outs: &[&'g Edge],
  graph: &'g GraphIndex,
) -> (Option<&'g Node>, Option<&'g Edge>) {
  let mut chosen = outs.iter().copied().find(|edge| {
    edge
      .source_handle
      .as_deref()
      .is_some_and(|handle| PREFERRED_HANDLES.contains(&handle))
  });

  if chosen.is_none() && outs.len() > 1 {
    let mut ranked: Vec<&Edge> = outs.to_vec();
    ranked.sort_by_key(|edge| std::cmp::Reverse(target_priority(edge, graph)));
    chosen = ranked.first().copied();
  }

  let edge = chosen.unwrap_or(outs[0]);
  (graph.node(&edge.target), Some(edge))
}

fn target_priority(edge: &Edge, graph: &GraphIndex) -> u8 {
  let Some(target) = graph.node(&edge.target) else {
    return 0;
  };
  match target.node_type.as_str() {
    t if is_agent_type(t) => 9,
    "router" => 8,
    "memory" => 7,
    "output" => 1,
    _ => 5,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn node(id: &str, node_type: &str) -> Node {
    serde_json::from_value(json!({ "id": id, "type": node_type, "data": {} })).unwrap()
  }

  fn edge(raw: serde_json::Value) -> Edge {
    serde_json::from_value(raw).unwrap()
  }

  fn routed(route: &str) -> DriverResponse {
    DriverResponse::ok().with_route(route)
  }

  #[test]
  fn router_follows_matching_handle() {
    let nodes = vec![node("r", "router"), node("a", "output"), node("b", "output")];
    let edges = vec![
      edge(json!({ "id": "e1", "source": "r", "target": "a", "sourceHandle": "yes" })),
      edge(json!({ "id": "e2", "source": "r", "target": "b", "sourceHandle": "no" })),
    ];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, used) = select_next_node(&nodes[0], &routed("no"), &graph);
    assert_eq!(next.unwrap().id, "b");
    assert_eq!(used.unwrap().id, "e2");
  }

  #[test]
  fn router_falls_back_to_first_edge_without_match() {
    let nodes = vec![node("r", "router"), node("a", "output")];
    let edges = vec![edge(json!({
      "id": "e1", "source": "r", "target": "a", "sourceHandle": "yes"
    }))];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, _) = select_next_node(&nodes[0], &routed("no"), &graph);
    assert_eq!(next.unwrap().id, "a");
  }

  #[test]
  fn preferred_handle_wins_over_priority() {
    let nodes = vec![node("n", "tool"), node("agent", "openai_agent"), node("t", "tool")];
    let edges = vec![
      edge(json!({ "id": "e1", "source": "n", "target": "agent" })),
      edge(json!({ "id": "e2", "source": "n", "target": "t", "sourceHandle": "out" })),
    ];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, _) = select_next_node(&nodes[0], &DriverResponse::ok(), &graph);
    assert_eq!(next.unwrap().id, "t");
  }

  #[test]
  fn anonymous_edges_rank_by_target_type() {
    let nodes = vec![node("n", "tool"), node("o", "output"), node("agent", "claude_agent")];
    let edges = vec![
      edge(json!({ "id": "e1", "source": "n", "target": "o" })),
      edge(json!({ "id": "e2", "source": "n", "target": "agent" })),
    ];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, _) = select_next_node(&nodes[0], &DriverResponse::ok(), &graph);
    assert_eq!(next.unwrap().id, "agent");
  }

  #[test]
  fn side_channel_targets_never_route() {
    let nodes = vec![node("n", "tool"), node("m", "memory")];
    let edges = vec![edge(json!({ "id": "e1", "source": "n", "target": "m" }))];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, used) = select_next_node(&nodes[0], &DriverResponse::ok(), &graph);
    assert!(next.is_none());
    assert!(used.is_none());
  }

  #[test]
  fn loop_exit_route_follows_exit_handle() {
    let nodes = vec![node("l", "loop"), node("body", "tool"), node("after", "output")];
    let edges = vec![
      edge(json!({ "id": "e1", "source": "l", "target": "body", "sourceHandle": "body" })),
      edge(json!({ "id": "e2", "source": "l", "target": "after", "sourceHandle": "exit" })),
    ];
    let graph = GraphIndex::new(&nodes, &edges);

    let (next, _) = select_next_node(&nodes[0], &routed("exit"), &graph);
    assert_eq!(next.unwrap().id, "after");
  }
}
