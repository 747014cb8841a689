use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("duplicate node id: {0}")]
  DuplicateNodeId(String),

  #[error("edge '{edge_id}' references unknown node: {node_id}")]
  DanglingEdge { edge_id: String, node_id: String },
}
