use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Boolean router: picks the `yes` or `no` branch from `context.condition`.
pub struct RouterDriver;

#[async_trait]
impl Driver for RouterDriver {
  fn type_name(&self) -> &'static str {
    "router"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    let route = if cx.condition { "yes" } else { "no" };
    debug!(node = %node.label(), condition = cx.condition, route, "router node");
    DriverResponse::ok().with_route(route)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;
  use trellis_memory::MemoryStore;

  #[tokio::test]
  async fn routes_on_condition_flag() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let node: Node =
      serde_json::from_value(json!({ "id": "r", "type": "router", "data": {} })).unwrap();

    let yes = registry
      .execute("router", &node, &Context { condition: true, ..Context::default() })
      .await;
    assert_eq!(yes.route.as_deref(), Some("yes"));

    let no = registry.execute("router", &node, &Context::default()).await;
    assert_eq!(no.route.as_deref(), Some("no"));
  }
}
