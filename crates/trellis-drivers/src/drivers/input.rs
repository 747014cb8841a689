use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Entry node: echoes the current input as its output.
pub struct InputDriver;

#[async_trait]
impl Driver for InputDriver {
  fn type_name(&self) -> &'static str {
    "input"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    debug!(node = %node.label(), "input node");
    DriverResponse::output(cx.input.clone())
  }
}
