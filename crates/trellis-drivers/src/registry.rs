use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use trellis_graph::Node;
use trellis_memory::MemoryStore;

use crate::agents::{ClaudeAgentDriver, OllamaAgentDriver, OpenAiAgentDriver};
use crate::context::Context;
use crate::drivers::{
  ConditionDriver, ForEachDriver, InputDriver, JoinDriver, LoopDriver, MemoryDriver,
  OutputDriver, ParallelDriver, RouterDriver, ToolDriver,
};
use crate::response::DriverResponse;

/// Interface every node driver implements.
///
/// Drivers never abort the walk themselves; failures come back as
/// `status: "error"` responses and the executor decides what to do with
/// them. The registry handle lets agents execute connected tool nodes and
/// lets loop drivers sub-walk their body.
#[async_trait]
pub trait Driver: Send + Sync {
  /// The node type string this driver answers to.
  fn type_name(&self) -> &'static str;

  async fn execute(&self, node: &Node, cx: &Context, registry: &DriverRegistry)
  -> DriverResponse;
}

/// Process-wide mapping from node type to driver.
///
/// Built once at startup and read-only afterwards; shared behind an `Arc`
/// across the kernel, branch workers, and the HTTP surface.
pub struct DriverRegistry {
  drivers: HashMap<&'static str, Arc<dyn Driver>>,
  memory: Arc<MemoryStore>,
}

impl DriverRegistry {
  /// Registry with every built-in driver registered.
  pub fn with_defaults(memory: Arc<MemoryStore>) -> Self {
    let mut registry = Self { drivers: HashMap::new(), memory };
    registry.register(Arc::new(InputDriver));
    registry.register(Arc::new(OutputDriver));
    registry.register(Arc::new(RouterDriver));
    registry.register(Arc::new(ConditionDriver));
    registry.register(Arc::new(ParallelDriver));
    registry.register(Arc::new(JoinDriver));
    registry.register(Arc::new(MemoryDriver));
    registry.register(Arc::new(ToolDriver));
    registry.register(Arc::new(LoopDriver));
    registry.register(Arc::new(ForEachDriver));
    registry.register(Arc::new(OpenAiAgentDriver::new()));
    registry.register(Arc::new(ClaudeAgentDriver::new()));
    registry.register(Arc::new(OllamaAgentDriver::new()));
    registry
  }

  /// Add or replace a driver.
  pub fn register(&mut self, driver: Arc<dyn Driver>) {
    self.drivers.insert(driver.type_name(), driver);
  }

  /// True when a driver is registered for the type.
  pub fn has_driver(&self, node_type: &str) -> bool {
    self.drivers.contains_key(node_type)
  }

  /// Shared memory store handle for drivers that persist values.
  pub fn memory(&self) -> &Arc<MemoryStore> {
    &self.memory
  }

  /// Dispatch a node to the driver registered for `node_type`.
  ///
  /// A missing driver is an error response, not a panic; the executor
  /// surfaces it like any other node failure.
  pub async fn execute(&self, node_type: &str, node: &Node, cx: &Context) -> DriverResponse {
    let Some(driver) = self.drivers.get(node_type) else {
      return DriverResponse::error(format!("No driver registered for node type '{node_type}'"));
    };
    debug!(node_id = %node.id, node_type, "dispatching node");
    driver.execute(node, cx, self).await
  }
}
