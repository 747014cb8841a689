use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Terminal node: the current input becomes the execution's final value
/// and the walk halts after this step.
pub struct OutputDriver;

#[async_trait]
impl Driver for OutputDriver {
  fn type_name(&self) -> &'static str {
    "output"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    debug!(node = %node.label(), "output node");
    DriverResponse { final_value: Some(cx.input.clone()), ..DriverResponse::default() }
  }
}
