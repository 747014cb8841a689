//! End-to-end kernel scenarios over in-process drivers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use trellis_drivers::{Context, Driver, DriverRegistry, DriverResponse};
use trellis_engine::{Executor, PollingReporter};
use trellis_graph::{Edge, Node};
use trellis_memory::MemoryStore;
use trellis_progress::{ExecutionCache, ExecutionStatus};

fn nodes_from(raw: Value) -> Vec<Node> {
  serde_json::from_value(raw).unwrap()
}

fn edges_from(raw: Value) -> Vec<Edge> {
  serde_json::from_value(raw).unwrap()
}

fn registry() -> Arc<DriverRegistry> {
  Arc::new(DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process())))
}

#[tokio::test]
async fn trivial_pipeline_flows_input_to_output() {
  let nodes = nodes_from(json!([
    { "id": "1", "type": "input", "data": { "value": "hi" } },
    { "id": "2", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([{ "id": "e1", "source": "1", "target": "2" }]));

  let executor = Executor::new(registry());
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok());
  assert_eq!(outcome.final_value, json!("hi"));
  assert_eq!(outcome.steps, 2);
  assert_eq!(outcome.trace.len(), 2);
  assert_eq!(outcome.completed_nodes, vec!["1", "2"]);
  assert_eq!(outcome.start_node_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn router_follows_condition_flag() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": {} },
    { "id": "r", "type": "router", "data": {} },
    { "id": "a", "type": "output", "data": {} },
    { "id": "b", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "r" },
    { "id": "e2", "source": "r", "target": "a", "sourceHandle": "yes" },
    { "id": "e3", "source": "r", "target": "b", "sourceHandle": "no" },
  ]));

  let executor = Executor::new(registry());

  let cx = Context { input: json!("x"), condition: true, ..Context::default() };
  let outcome = executor.execute(&nodes, &edges, cx, None).await;
  assert_eq!(outcome.completed_nodes.last().map(String::as_str), Some("a"));

  // Router fidelity: the routed entry's edge handle matches the route.
  let router_entry = outcome.trace.iter().find(|entry| entry.node_id == "r").unwrap();
  assert_eq!(router_entry.result.route.as_deref(), Some("yes"));
  assert_eq!(router_entry.next_node_id.as_deref(), Some("a"));

  let cx = Context { input: json!("x"), condition: false, ..Context::default() };
  let outcome = executor.execute(&nodes, &edges, cx, None).await;
  assert_eq!(outcome.completed_nodes.last().map(String::as_str), Some("b"));
}

/// Probe agent: emits the knowledge the context builder assembled for it.
struct KnowledgeProbe;

#[async_trait]
impl Driver for KnowledgeProbe {
  fn type_name(&self) -> &'static str {
    "probe_agent"
  }

  async fn execute(
    &self,
    _node: &Node,
    cx: &Context,
    _registry: &DriverRegistry,
  ) -> DriverResponse {
    DriverResponse::output(Value::Object(cx.knowledge.clone().unwrap_or_default()))
  }
}

#[tokio::test]
async fn memory_side_channel_feeds_agent_knowledge() {
  let memory = Arc::new(MemoryStore::in_process());
  memory.set("d:k", json!("remembered")).await;
  let mut registry = DriverRegistry::with_defaults(memory);
  registry.register(Arc::new(KnowledgeProbe));

  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": {} },
    { "id": "agent", "type": "probe_agent", "data": {} },
    { "id": "mem", "type": "memory", "data": { "namespace": "d", "key": "k" } },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "agent" },
    { "id": "e2", "source": "agent", "target": "mem" },
    { "id": "e3", "source": "agent", "target": "out" },
  ]));

  let executor = Executor::new(Arc::new(registry));
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok());
  // The agent saw the seeded knowledge.
  assert_eq!(outcome.final_value, json!({ "k": "remembered" }));

  let agent_entry = outcome.trace.iter().find(|entry| entry.node_id == "agent").unwrap();
  assert_eq!(agent_entry.used_memory.as_deref(), Some(["mem".to_string()].as_slice()));

  // Side-channel exclusion: nothing routes into the memory node.
  assert!(
    outcome.trace.iter().all(|entry| entry.next_node_id.as_deref() != Some("mem")),
    "memory node must never be a control-flow target"
  );
  assert!(!outcome.completed_nodes.contains(&"mem".to_string()));
}

/// Emits the node's configured `value`, standing in for any branch body
/// that produces a distinct result.
struct EmitDriver;

#[async_trait]
impl Driver for EmitDriver {
  fn type_name(&self) -> &'static str {
    "emit"
  }

  async fn execute(
    &self,
    node: &Node,
    _cx: &Context,
    _registry: &DriverRegistry,
  ) -> DriverResponse {
    DriverResponse::output(node.data.get("value").cloned().unwrap_or(Value::Null))
  }
}

#[tokio::test]
async fn parallel_branches_join_in_edge_order() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": { "value": "" } },
    { "id": "p", "type": "parallel", "data": {} },
    { "id": "b1", "type": "emit", "data": { "value": "A" } },
    { "id": "b2", "type": "emit", "data": { "value": "B" } },
    { "id": "b3", "type": "emit", "data": { "value": "C" } },
    { "id": "j", "type": "join", "data": { "merge_strategy": "list" } },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e0", "source": "in", "target": "p" },
    { "id": "e1", "source": "p", "target": "b1" },
    { "id": "e2", "source": "p", "target": "b2" },
    { "id": "e3", "source": "p", "target": "b3" },
    { "id": "e4", "source": "b1", "target": "j" },
    { "id": "e5", "source": "b2", "target": "j" },
    { "id": "e6", "source": "b3", "target": "j" },
    { "id": "e7", "source": "j", "target": "out" },
  ]));

  let mut base = DriverRegistry::with_defaults(Arc::new(MemoryStore::in_process()));
  base.register(Arc::new(EmitDriver));
  let executor = Executor::new(Arc::new(base));
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
  assert_eq!(outcome.final_value, json!(["A", "B", "C"]));

  // The parallel node's trace entry hands control to the join.
  let parallel_entry = outcome.trace.iter().find(|entry| entry.node_id == "p").unwrap();
  assert_eq!(parallel_entry.next_node_id.as_deref(), Some("j"));
  // Branch entries are present for all three branches.
  for branch in ["b1", "b2", "b3"] {
    assert!(outcome.trace.iter().any(|entry| entry.node_id == branch));
  }
}

#[tokio::test]
async fn malformed_condition_soft_fails_to_no_branch() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": {} },
    { "id": "c", "type": "condition", "data": { "expression": "input ===" } },
    { "id": "yes", "type": "output", "data": {} },
    { "id": "no", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "c" },
    { "id": "e2", "source": "c", "target": "yes", "sourceHandle": "yes" },
    { "id": "e3", "source": "c", "target": "no", "sourceHandle": "no" },
  ]));

  let executor = Executor::new(registry());
  let cx = Context { input: json!("x"), ..Context::default() };
  let outcome = executor.execute(&nodes, &edges, cx, None).await;

  assert!(outcome.is_ok());
  assert_eq!(outcome.completed_nodes.last().map(String::as_str), Some("no"));
  let condition_entry = outcome.trace.iter().find(|entry| entry.node_id == "c").unwrap();
  assert!(
    condition_entry.result.error.as_deref().unwrap().contains("Expression evaluation failed")
  );
}

#[tokio::test]
async fn cyclic_graph_terminates_at_step_budget() {
  let nodes = nodes_from(json!([
    { "id": "a", "type": "input", "data": {} },
    { "id": "b", "type": "input", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "a", "target": "b" },
    { "id": "e2", "source": "b", "target": "a" },
  ]));

  let executor = Executor::new(registry()).with_max_steps(5);
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok());
  assert_eq!(outcome.steps, 5);
  assert_eq!(outcome.trace.len(), 5);
}

#[tokio::test]
async fn soft_error_passes_input_through_and_is_recorded() {
  // for_each over a non-array input fails; continue_on_error keeps walking.
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": { "value": "scalar" } },
    { "id": "fe", "type": "for_each", "data": { "continue_on_error": true } },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "fe" },
    { "id": "e2", "source": "fe", "target": "out", "sourceHandle": "exit" },
  ]));

  let executor = Executor::new(registry());
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok());
  assert_eq!(outcome.final_value, json!("scalar"));
  assert_eq!(outcome.error_nodes, vec!["fe"]);
  assert!(outcome.completed_nodes.contains(&"out".to_string()));

  let soft_entry = outcome.trace.iter().find(|entry| entry.node_id == "fe").unwrap();
  assert!(soft_entry.result.had_error);
  assert!(soft_entry.result.is_ok());
}

#[tokio::test]
async fn hard_error_aborts_with_partial_trace() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": { "value": "scalar" } },
    { "id": "fe", "type": "for_each", "data": {} },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "fe" },
    { "id": "e2", "source": "fe", "target": "out", "sourceHandle": "exit" },
  ]));

  let executor = Executor::new(registry());
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(!outcome.is_ok());
  assert!(outcome.error.as_deref().unwrap().contains("array"));
  // Both the successful input step and the failed node are in the trace.
  assert_eq!(outcome.trace.len(), 2);
  assert_eq!(outcome.completed_nodes, vec!["in"]);
  assert_eq!(outcome.error_nodes, vec!["fe"]);
}

#[tokio::test]
async fn pure_walks_are_deterministic() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": { "value": "seed" } },
    { "id": "t", "type": "tool", "data": { "operation": "uppercase" } },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "t" },
    { "id": "e2", "source": "t", "target": "out" },
  ]));

  let executor = Executor::new(registry());
  let first = executor.execute(&nodes, &edges, Context::default(), None).await;
  let second = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert_eq!(
    serde_json::to_value(&first.trace).unwrap(),
    serde_json::to_value(&second.trace).unwrap()
  );
  assert_eq!(first.final_value, second.final_value);
  assert_eq!(first.completed_nodes, second.completed_nodes);
}

#[tokio::test]
async fn polling_reporter_reaches_terminal_state_once() {
  let cache = Arc::new(ExecutionCache::new());
  let reporter = Arc::new(PollingReporter::new(cache.clone(), "exec-1"));
  let executor = Executor::with_reporter(registry(), reporter);

  let nodes = nodes_from(json!([
    { "id": "1", "type": "input", "data": { "value": "hi" } },
    { "id": "2", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([{ "id": "e1", "source": "1", "target": "2" }]));

  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;
  assert!(outcome.is_ok());

  let state = cache.get("exec-1").unwrap();
  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(state.final_value, json!("hi"));
  assert_eq!(state.completed_nodes, vec!["1", "2"]);
  assert_eq!(state.steps, 2);
  assert!(state.current_node_id.is_none());
}

#[tokio::test]
async fn empty_node_list_is_rejected() {
  let executor = Executor::new(registry());
  let outcome = executor.execute(&[], &[], Context::default(), None).await;
  assert!(!outcome.is_ok());
  assert_eq!(outcome.error.as_deref(), Some("nodes are required"));
}

#[tokio::test]
async fn loop_body_runs_per_iteration() {
  let nodes = nodes_from(json!([
    { "id": "in", "type": "input", "data": { "value": "x" } },
    { "id": "l", "type": "loop", "data": { "iterations": 3 } },
    { "id": "body", "type": "tool", "data": { "operation": "append", "arg": "+" } },
    { "id": "out", "type": "output", "data": {} },
  ]));
  let edges = edges_from(json!([
    { "id": "e1", "source": "in", "target": "l" },
    { "id": "e2", "source": "l", "target": "body", "sourceHandle": "body" },
    { "id": "e3", "source": "l", "target": "out", "sourceHandle": "exit" },
  ]));

  let executor = Executor::new(registry());
  let outcome = executor.execute(&nodes, &edges, Context::default(), None).await;

  assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
  // Three chained iterations append one '+' each.
  assert_eq!(outcome.final_value, json!("x+++"));
  let loop_entry = outcome.trace.iter().find(|entry| entry.node_id == "l").unwrap();
  assert_eq!(loop_entry.result.route.as_deref(), Some("exit"));
  assert_eq!(loop_entry.next_node_id.as_deref(), Some("out"));
}
