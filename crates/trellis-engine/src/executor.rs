use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use trellis_drivers::{Context, DriverRegistry, DriverResponse, ResponseStatus};
use trellis_graph::{Edge, GraphIndex, Node, is_agent_type};
use trellis_progress::{TraceContext, TraceEntry};

use crate::builder::build_agent_context;
use crate::parallel::run_parallel;
use crate::reporter::{NoopReporter, ProgressReporter};
use crate::router::select_next_node;

/// Default bound on waiting for parallel branches to join.
const DEFAULT_BRANCH_JOIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of a workflow execution, wire-compatible with the synchronous
/// endpoint's response shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
  pub status: ResponseStatus,
  #[serde(rename = "final")]
  pub final_value: Value,
  pub trace: Vec<TraceEntry>,
  pub steps: usize,
  pub start_node_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub completed_nodes: Vec<String>,
  pub error_nodes: Vec<String>,
}

impl ExecutionOutcome {
  fn failed(error: impl Into<String>, trace: Vec<TraceEntry>, steps: usize) -> Self {
    Self {
      status: ResponseStatus::Error,
      final_value: Value::Null,
      trace,
      steps,
      start_node_id: None,
      error: Some(error.into()),
      completed_nodes: Vec::new(),
      error_nodes: Vec::new(),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == ResponseStatus::Ok
  }
}

/// The orchestration kernel.
///
/// Generic over the progress reporter so the same walk serves the
/// synchronous endpoint (no-op reporter) and the async dispatcher
/// (cache-backed polling reporter). The registry is shared and read-only;
/// one executor can run many executions concurrently.
pub struct Executor<R: ProgressReporter = NoopReporter> {
  registry: Arc<DriverRegistry>,
  reporter: Arc<R>,
  max_steps: Option<usize>,
  branch_join_timeout: Duration,
}

impl Executor<NoopReporter> {
  /// Executor that discards progress events.
  pub fn new(registry: Arc<DriverRegistry>) -> Self {
    Self::with_reporter(registry, Arc::new(NoopReporter))
  }
}

impl<R: ProgressReporter> Executor<R> {
  pub fn with_reporter(registry: Arc<DriverRegistry>, reporter: Arc<R>) -> Self {
    Self {
      registry,
      reporter,
      max_steps: None,
      branch_join_timeout: DEFAULT_BRANCH_JOIN_TIMEOUT,
    }
  }

  /// Override the step budget. Defaults to `nodes + edges + 10`, which
  /// bounds cyclic graphs without starving long chains.
  pub fn with_max_steps(mut self, max_steps: usize) -> Self {
    self.max_steps = Some(max_steps);
    self
  }

  pub fn with_branch_join_timeout(mut self, timeout: Duration) -> Self {
    self.branch_join_timeout = timeout;
    self
  }

  /// Walk the graph to completion.
  pub async fn execute(
    &self,
    nodes: &[Node],
    edges: &[Edge],
    context: Context,
    start_node_id: Option<&str>,
  ) -> ExecutionOutcome {
    if nodes.is_empty() {
      let outcome = ExecutionOutcome::failed("nodes are required", Vec::new(), 0);
      self.reporter.on_execution_error("nodes are required", &[], &[]);
      return outcome;
    }

    let graph = Arc::new(GraphIndex::new(nodes, edges));
    let mut cx = context;
    cx.graph = Some(graph.clone());

    let Some(start) = graph.select_start(start_node_id).cloned() else {
      let outcome = ExecutionOutcome::failed("no start node could be resolved", Vec::new(), 0);
      self.reporter.on_execution_error("no start node could be resolved", &[], &[]);
      return outcome;
    };

    // Seed the input from the start node's configured value when the
    // caller supplied nothing.
    if start.node_type == "input" && cx.input_is_empty() {
      if let Some(value) = start.data.get("value") {
        cx.input = value.clone();
      }
    }

    info!(start_node_id = %start.id, nodes = nodes.len(), edges = edges.len(), "execution start");
    self.reporter.on_execution_start(nodes.len(), Some(&start.id));

    let max_steps = self.max_steps.unwrap_or(nodes.len() + edges.len() + 10);
    let mut current: Option<Node> = Some(start.clone());
    let mut steps = 0;
    let mut trace: Vec<TraceEntry> = Vec::new();
    let mut completed_nodes: Vec<String> = Vec::new();
    let mut error_nodes: Vec<String> = Vec::new();
    let mut final_value = Value::Null;

    while let Some(node) = current.take() {
      if steps >= max_steps {
        warn!(max_steps, "step budget exhausted");
        break;
      }
      steps += 1;
      self.reporter.on_node_start(&node.id, steps);

      let (exec_cx, used_memory, used_tools) = if is_agent_type(&node.node_type) {
        build_agent_context(&node, &cx, &graph, self.registry.memory()).await
      } else {
        (cx.clone(), Vec::new(), Vec::new())
      };

      let mut result = self.registry.execute(&node.node_type, &node, &exec_cx).await;

      // A hard driver error becomes a soft one when the node opts in.
      if !result.is_ok() && node.data_flag("continue_on_error") {
        result = soften_error(result, &exec_cx.input);
      }

      if !result.is_ok() {
        let message =
          result.error.clone().unwrap_or_else(|| "node execution failed".to_string());
        trace.push(make_trace_entry(
          &node,
          result,
          exec_cx.input.clone(),
          None,
          None,
          &used_memory,
          &used_tools,
        ));
        error_nodes.push(node.id.clone());
        warn!(node_id = %node.id, error = %message, "execution aborted");
        self.reporter.on_execution_error(&message, &trace, &error_nodes);
        return ExecutionOutcome {
          start_node_id: Some(start.id.clone()),
          completed_nodes,
          error_nodes,
          ..ExecutionOutcome::failed(message, trace, steps)
        };
      }

      if result.parallel {
        propagate(&mut cx, &mut final_value, &result);

        let parallel = run_parallel(
          self.registry.clone(),
          self.reporter.clone(),
          graph.clone(),
          &node,
          &cx,
          self.branch_join_timeout,
        )
        .await;

        match parallel {
          Ok(outcome) => {
            trace.extend(outcome.branch_trace);
            cx.parallel_results = Some(outcome.results);

            let next_id = outcome.join_node.as_ref().map(|join| join.id.clone());
            trace.push(make_trace_entry(
              &node,
              result,
              cx.input.clone(),
              None,
              next_id.as_deref(),
              &used_memory,
              &used_tools,
            ));
            completed_nodes.push(node.id.clone());
            self.reporter.on_node_complete(
              trace.last().expect("entry just pushed"),
              &completed_nodes,
              &error_nodes,
              &trace,
              steps,
            );
            current = outcome.join_node;
            continue;
          }
          Err(message) => {
            error_nodes.push(node.id.clone());
            self.reporter.on_execution_error(&message, &trace, &error_nodes);
            return ExecutionOutcome {
              start_node_id: Some(start.id.clone()),
              completed_nodes,
              error_nodes,
              ..ExecutionOutcome::failed(message, trace, steps)
            };
          }
        }
      }

      propagate(&mut cx, &mut final_value, &result);

      if result.had_error {
        error_nodes.push(node.id.clone());
      }

      let (next, used_edge) = select_next_node(&node, &result, &graph);
      let next_owned = next.cloned();
      let entry = make_trace_entry(
        &node,
        result,
        cx.input.clone(),
        used_edge,
        next_owned.as_ref().map(|n| n.id.as_str()),
        &used_memory,
        &used_tools,
      );
      trace.push(entry);
      completed_nodes.push(node.id.clone());
      self.reporter.on_node_complete(
        trace.last().expect("entry just pushed"),
        &completed_nodes,
        &error_nodes,
        &trace,
        steps,
      );

      if node.node_type == "output" {
        debug!(node_id = %node.id, "output node reached, halting");
        break;
      }
      current = next_owned;
    }

    info!(steps, "execution complete");
    self.reporter.on_execution_complete(&final_value, &trace, &completed_nodes, steps);

    ExecutionOutcome {
      status: ResponseStatus::Ok,
      final_value,
      trace,
      steps,
      start_node_id: Some(start.id),
      error: None,
      completed_nodes,
      error_nodes,
    }
  }
}

/// Merge a driver result into the walked context: returned state merges
/// into `context.state`, an output becomes the next input and the running
/// final value, an explicit final wins last.
pub(crate) fn propagate(cx: &mut Context, final_value: &mut Value, result: &DriverResponse) {
  if let Some(state) = &result.state {
    cx.state.extend(state.clone());
  }
  if let Some(output) = &result.output {
    cx.input = output.clone();
    *final_value = output.clone();
  }
  if let Some(explicit) = &result.final_value {
    *final_value = explicit.clone();
  }
}

/// Convert a hard error into the soft shape: the walk continues, the input
/// passes through unchanged, and the node lands in `errorNodes`.
pub(crate) fn soften_error(result: DriverResponse, input: &Value) -> DriverResponse {
  DriverResponse {
    status: ResponseStatus::Ok,
    had_error: true,
    output: Some(input.clone()),
    error: result.error,
    error_type: result.error_type.or_else(|| Some("driver_error".to_string())),
    extras: result.extras,
    ..DriverResponse::default()
  }
}

pub(crate) fn make_trace_entry(
  node: &Node,
  result: DriverResponse,
  input: Value,
  used_edge: Option<&Edge>,
  next_node_id: Option<&str>,
  used_memory: &[String],
  used_tools: &[String],
) -> TraceEntry {
  let is_agent = is_agent_type(&node.node_type);
  TraceEntry {
    node_id: node.id.clone(),
    node_type: node.node_type.clone(),
    result,
    context: TraceContext { input },
    edge_id: used_edge.map(|edge| edge.id.clone()),
    next_node_id: next_node_id.map(str::to_string),
    used_memory: is_agent.then(|| used_memory.to_vec()),
    used_tools: is_agent.then(|| used_tools.to_vec()),
  }
}
