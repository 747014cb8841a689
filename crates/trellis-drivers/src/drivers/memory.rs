use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use trellis_graph::Node;

use crate::context::Context;
use crate::registry::{Driver, DriverRegistry};
use crate::response::DriverResponse;

/// Memory node: persists a value under `{namespace}:{key}` and mirrors it
/// into the transient execution state.
///
/// The value written is the explicit `value` key from the context when
/// present, otherwise the current input. The input passes through so the
/// next node sees the same value.
pub struct MemoryDriver;

#[async_trait]
impl Driver for MemoryDriver {
  fn type_name(&self) -> &'static str {
    "memory"
  }

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry) -> DriverResponse {
    let key = node.data_str("key").unwrap_or("memory");
    let namespace = node.data_str("namespace").filter(|s| !s.is_empty()).unwrap_or("default");
    let store_key = format!("{namespace}:{key}");

    let value = cx.extras.get("value").cloned().unwrap_or_else(|| cx.input.clone());

    let store = registry.memory();
    let previous = store.get(&store_key).await;
    debug!(node = %node.label(), store_key, "memory node write");
    store.set(&store_key, value.clone()).await;

    let mut state = cx.state.clone();
    state.insert(key.to_string(), value.clone());

    DriverResponse {
      output: Some(value.clone()),
      state: Some(state),
      ..DriverResponse::default()
    }
    .with_extra("previous", previous.unwrap_or(Value::Null))
    .with_extra("stored", value)
  }
}
