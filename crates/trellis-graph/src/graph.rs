use std::collections::HashMap;

use crate::node::{Edge, Node};
use crate::{GraphError, SIDE_CHANNEL_TYPES};

/// Resolved lookup structure for graph traversal.
///
/// Built once per execution from the submitted node and edge lists.
/// Unknown edge endpoints are tolerated (the edge simply never routes),
/// matching how graph editors leave half-connected edges behind.
#[derive(Debug, Clone)]
pub struct GraphIndex {
  /// Node lookup by id.
  nodes: HashMap<String, Node>,
  /// Node ids in submission order, for start-node fallback.
  order: Vec<String>,
  /// Outgoing edges by source node id, in submission order.
  outgoing: HashMap<String, Vec<Edge>>,
  /// Incoming edge counts by target node id.
  incoming_count: HashMap<String, usize>,
  /// All edges in submission order.
  edges: Vec<Edge>,
}

impl GraphIndex {
  /// Build the index from node and edge lists.
  pub fn new(nodes: &[Node], edges: &[Edge]) -> Self {
    let mut node_map = HashMap::with_capacity(nodes.len());
    let mut order = Vec::with_capacity(nodes.len());
    let mut incoming_count: HashMap<String, usize> = HashMap::with_capacity(nodes.len());

    for node in nodes {
      order.push(node.id.clone());
      incoming_count.entry(node.id.clone()).or_insert(0);
      node_map.insert(node.id.clone(), node.clone());
    }

    let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
    for edge in edges {
      outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
      if let Some(count) = incoming_count.get_mut(&edge.target) {
        *count += 1;
      }
    }

    Self {
      nodes: node_map,
      order,
      outgoing,
      incoming_count,
      edges: edges.to_vec(),
    }
  }

  /// Check structural invariants: unique node ids and edge endpoints that
  /// reference extant nodes.
  pub fn validate(nodes: &[Node], edges: &[Edge]) -> Result<(), GraphError> {
    let mut seen = HashMap::with_capacity(nodes.len());
    for node in nodes {
      if seen.insert(node.id.as_str(), ()).is_some() {
        return Err(GraphError::DuplicateNodeId(node.id.clone()));
      }
    }
    for edge in edges {
      for endpoint in [&edge.source, &edge.target] {
        if !seen.contains_key(endpoint.as_str()) {
          return Err(GraphError::DanglingEdge {
            edge_id: edge.id.clone(),
            node_id: endpoint.clone(),
          });
        }
      }
    }
    Ok(())
  }

  /// Look up a node by id.
  pub fn node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// All outgoing edges for a node, in submission order.
  pub fn outgoing(&self, node_id: &str) -> &[Edge] {
    self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Outgoing edges that participate in control flow: edges whose target
  /// is a `memory` or `tool` node are side channels and excluded here.
  pub fn control_flow_outgoing(&self, node_id: &str) -> Vec<&Edge> {
    self
      .outgoing(node_id)
      .iter()
      .filter(|edge| {
        self
          .nodes
          .get(&edge.target)
          .is_some_and(|target| !SIDE_CHANNEL_TYPES.contains(&target.node_type.as_str()))
      })
      .collect()
  }

  /// Resolve the node to start execution from.
  ///
  /// Priority: explicit id, first `input`-typed node, first node with no
  /// incoming edges, first node in the list.
  pub fn select_start(&self, start_node_id: Option<&str>) -> Option<&Node> {
    if let Some(start) = start_node_id.and_then(|id| self.nodes.get(id)) {
      return Some(start);
    }

    if let Some(start) = self
      .order
      .iter()
      .filter_map(|id| self.nodes.get(id))
      .find(|node| node.node_type == "input")
    {
      return Some(start);
    }

    if let Some(start) = self
      .order
      .iter()
      .find(|id| self.incoming_count.get(*id).copied().unwrap_or(0) == 0)
      .and_then(|id| self.nodes.get(id))
    {
      return Some(start);
    }

    self.order.first().and_then(|id| self.nodes.get(id))
  }

  /// All edges in submission order, incident scans included.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn node_count(&self) -> usize {
    self.order.len()
  }

  pub fn edge_count(&self) -> usize {
    self.edges.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn node(id: &str, node_type: &str) -> Node {
    serde_json::from_value(json!({ "id": id, "type": node_type, "data": {} })).unwrap()
  }

  fn edge(id: &str, source: &str, target: &str) -> Edge {
    serde_json::from_value(json!({ "id": id, "source": source, "target": target })).unwrap()
  }

  #[test]
  fn start_prefers_explicit_id() {
    let nodes = vec![node("a", "input"), node("b", "tool")];
    let index = GraphIndex::new(&nodes, &[]);
    assert_eq!(index.select_start(Some("b")).unwrap().id, "b");
  }

  #[test]
  fn start_falls_back_to_input_node() {
    let nodes = vec![node("a", "tool"), node("b", "input")];
    let index = GraphIndex::new(&nodes, &[]);
    assert_eq!(index.select_start(None).unwrap().id, "b");
  }

  #[test]
  fn start_falls_back_to_entry_point() {
    let nodes = vec![node("a", "tool"), node("b", "tool")];
    let edges = vec![edge("e1", "a", "b")];
    let index = GraphIndex::new(&nodes, &edges);
    assert_eq!(index.select_start(None).unwrap().id, "a");
  }

  #[test]
  fn start_falls_back_to_first_node_on_cycles() {
    let nodes = vec![node("a", "tool"), node("b", "tool")];
    let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "a")];
    let index = GraphIndex::new(&nodes, &edges);
    assert_eq!(index.select_start(None).unwrap().id, "a");
  }

  #[test]
  fn control_flow_outgoing_excludes_side_channels() {
    let nodes = vec![node("a", "openai_agent"), node("m", "memory"), node("b", "output")];
    let edges = vec![edge("e1", "a", "m"), edge("e2", "a", "b")];
    let index = GraphIndex::new(&nodes, &edges);
    let outs = index.control_flow_outgoing("a");
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].target, "b");
  }

  #[test]
  fn validate_rejects_duplicate_ids_and_dangling_edges() {
    let dup = vec![node("a", "tool"), node("a", "tool")];
    assert!(GraphIndex::validate(&dup, &[]).is_err());

    let nodes = vec![node("a", "tool")];
    let edges = vec![edge("e1", "a", "ghost")];
    assert!(GraphIndex::validate(&nodes, &edges).is_err());
  }
}
