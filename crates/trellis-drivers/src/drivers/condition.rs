use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::expr::evaluate_expression;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Expression router: evaluates the configured expression against
/// `{input, state, params}` and routes `yes`/`no`.
///
/// A malformed expression routes to `no` with the error recorded in the
/// response; it never aborts the walk.
pub struct ConditionDriver;

#[async_trait]
impl Driver for ConditionDriver {
  fn type_name(&self) -> &'static str {
    "condition"
  }

  async fn execute(&self, node: &Node, cx: &Context, _registry: &DriverRegistry) -> DriverResponse {
    let expression = node.data_str("expression").unwrap_or("");
    if expression.is_empty() {
      return DriverResponse::ok().with_route("no");
    }

    match evaluate_expression(expression, &cx.input, &cx.state, &cx.params) {
      Ok(result) => {
        let route = if result { "yes" } else { "no" };
        debug!(node = %node.label(), expression, route, "condition node");
        DriverResponse::ok().with_route(route)
      }
      Err(err) => {
        let mut response = DriverResponse::ok().with_route("no");
        response.error = Some(format!("Expression evaluation failed: {err}"));
        response
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;
  use trellis_memory::MemoryStore;

  fn condition_node(expression: &str) -> Node {
    serde_json::from_value(json!({
      "id": "c",
      "type": "condition",
      "data": { "expression": expression }
    }))
    .unwrap()
  }

  #[tokio::test]
  async fn routes_yes_when_expression_holds() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let cx = Context { input: json!("urgent: fix this"), ..Context::default() };
    let response =
      registry.execute("condition", &condition_node("input contains 'urgent'"), &cx).await;
    assert_eq!(response.route.as_deref(), Some("yes"));
    assert!(response.error.is_none());
  }

  #[tokio::test]
  async fn malformed_expression_routes_no_without_failing() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let response = registry
      .execute("condition", &condition_node("input ==="), &Context::default())
      .await;
    assert!(response.is_ok());
    assert_eq!(response.route.as_deref(), Some("no"));
    assert!(response.error.as_deref().unwrap().starts_with("Expression evaluation failed"));
  }

  #[tokio::test]
  async fn empty_expression_defaults_to_no() {
    let registry = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
    let response =
      registry.execute("condition", &condition_node(""), &Context::default()).await;
    assert_eq!(response.route.as_deref(), Some("no"));
  }
}
