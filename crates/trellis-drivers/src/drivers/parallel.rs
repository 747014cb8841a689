use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Fork marker: passes the input through and signals the executor to fan
/// the outgoing edges out as independent branches. The driver itself does
/// no branching; the parallel coordinator owns that.
pub struct ParallelDriver;

#[async_trait]
impl Driver for ParallelDriver {
  fn type_name(&self) -> &'static str {
    "parallel"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    debug!(node = %node.label(), "parallel node, fanning out");
    DriverResponse { parallel: true, output: Some(cx.input.clone()), ..DriverResponse::default() }
  }
}
