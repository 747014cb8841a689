//! Parallel branch coordination.
//!
//! A `parallel` node fans its control-flow edges out as independent
//! branches, each running a reduced kernel on its own tokio task with a
//! cloned context (the clone deep-copies `state`; the memory store is the
//! only cross-branch channel). Branch results come back in edge order;
//! failed branches contribute `null`. The downstream `join` node is found
//! one edge-level past the branch heads and executed later by the outer
//! kernel with `parallel_results` populated.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};
use trellis_drivers::{Context, DriverRegistry};
use trellis_graph::{GraphIndex, Node, is_agent_type};
use trellis_progress::{BranchStatus, TraceEntry};

use crate::builder::build_agent_context;
use crate::executor::{make_trace_entry, propagate, soften_error};
use crate::reporter::ProgressReporter;
use crate::router::select_next_node;

/// Step budget per branch, independent of the outer walk's budget.
const BRANCH_MAX_STEPS: usize = 100;

pub(crate) struct ParallelOutcome {
  /// Branch outputs in branch-head edge order; `null` for failed branches.
  pub results: Vec<Value>,
  /// Trace entries from all branches, grouped by branch in order.
  pub branch_trace: Vec<TraceEntry>,
  /// The join node the outer kernel should continue at, if any.
  pub join_node: Option<Node>,
}

struct BranchOutcome {
  final_output: Option<Value>,
  trace: Vec<TraceEntry>,
}

pub(crate) async fn run_parallel<R: ProgressReporter>(
  registry: Arc<DriverRegistry>,
  reporter: Arc<R>,
  graph: Arc<GraphIndex>,
  parallel_node: &Node,
  cx: &Context,
  join_timeout: Duration,
) -> Result<ParallelOutcome, String> {
  let branch_edges: Vec<_> =
    graph.control_flow_outgoing(&parallel_node.id).into_iter().cloned().collect();

  let mut branch_ids = Vec::with_capacity(branch_edges.len());
  let mut handles = Vec::with_capacity(branch_edges.len());

  for (index, edge) in branch_edges.iter().enumerate() {
    let branch_id = format!("{}_branch_{}", parallel_node.id, index);
    reporter.on_branch_status(&branch_id, BranchStatus::Queued, None);

    let head = graph.node(&edge.target).cloned();
    let mut branch_cx = cx.clone().without_agent_fields();
    branch_cx.parallel_results = None;

    let registry = registry.clone();
    let reporter = reporter.clone();
    let graph = graph.clone();
    let id = branch_id.clone();
    branch_ids.push(branch_id);

    handles.push(tokio::spawn(async move {
      let Some(head) = head else {
        reporter.on_branch_status(&id, BranchStatus::Error, Some("branch head not found"));
        return BranchOutcome { final_output: None, trace: Vec::new() };
      };
      reporter.on_branch_status(&id, BranchStatus::Running, None);
      match execute_branch(&registry, &graph, head, branch_cx).await {
        Ok((output, trace)) => {
          reporter.on_branch_status(&id, BranchStatus::Ok, None);
          BranchOutcome { final_output: Some(output), trace }
        }
        Err((message, trace)) => {
          warn!(branch_id = %id, error = %message, "branch failed");
          reporter.on_branch_status(&id, BranchStatus::Error, Some(&message));
          BranchOutcome { final_output: None, trace }
        }
      }
    }));
  }

  debug!(branches = handles.len(), "waiting for parallel branches");
  let joined = tokio::time::timeout(join_timeout, join_all(handles))
    .await
    .map_err(|_| format!("parallel branches timed out after {}s", join_timeout.as_secs()))?;

  let mut results = Vec::with_capacity(joined.len());
  let mut branch_trace = Vec::new();
  for (join_result, branch_id) in joined.into_iter().zip(branch_ids) {
    match join_result {
      Ok(outcome) => {
        results.push(outcome.final_output.unwrap_or(Value::Null));
        branch_trace.extend(outcome.trace);
      }
      Err(err) => {
        warn!(branch_id = %branch_id, error = %err, "branch task panicked");
        reporter.on_branch_status(&branch_id, BranchStatus::Error, Some(&err.to_string()));
        results.push(Value::Null);
      }
    }
  }

  Ok(ParallelOutcome {
    results,
    branch_trace,
    join_node: find_join_node(&graph, parallel_node, &branch_edges),
  })
}

/// Reduced kernel for one branch: same step rules as the outer walk but
/// stopping at a `join` node (executed later by the outer kernel), an
/// `output` node, or a dead end. Returns the branch's final output and its
/// trace entries.
async fn execute_branch(
  registry: &Arc<DriverRegistry>,
  graph: &Arc<GraphIndex>,
  head: Node,
  mut cx: Context,
) -> Result<(Value, Vec<TraceEntry>), (String, Vec<TraceEntry>)> {
  let mut current = Some(head);
  let mut steps = 0;
  let mut trace: Vec<TraceEntry> = Vec::new();
  let mut final_value = Value::Null;

  while let Some(node) = current.take() {
    if node.node_type == "join" || steps >= BRANCH_MAX_STEPS {
      break;
    }
    steps += 1;

    let (exec_cx, used_memory, used_tools) = if is_agent_type(&node.node_type) {
      build_agent_context(&node, &cx, graph, registry.memory()).await
    } else {
      (cx.clone(), Vec::new(), Vec::new())
    };

    let mut result = registry.execute(&node.node_type, &node, &exec_cx).await;
    if !result.is_ok() && node.data_flag("continue_on_error") {
      result = soften_error(result, &exec_cx.input);
    }

    if !result.is_ok() {
      let message = result.error.clone().unwrap_or_else(|| "node execution failed".to_string());
      trace.push(make_trace_entry(
        &node,
        result,
        exec_cx.input.clone(),
        None,
        None,
        &used_memory,
        &used_tools,
      ));
      return Err((format!("branch node {} failed: {message}", node.id), trace));
    }

    propagate(&mut cx, &mut final_value, &result);

    let (next, used_edge) = select_next_node(&node, &result, graph);
    let next_owned = next.cloned();
    trace.push(make_trace_entry(
      &node,
      result,
      cx.input.clone(),
      used_edge,
      next_owned.as_ref().map(|n| n.id.as_str()),
      &used_memory,
      &used_tools,
    ));

    if node.node_type == "output" {
      break;
    }
    current = next_owned;
  }

  Ok((final_value, trace))
}

/// Locate the join node for a parallel fan-out: a branch head that is
/// itself a `join`, or the first `join` one edge past a branch head.
/// Deeper branch sub-graphs keep their join out of sight by design.
fn find_join_node(
  graph: &GraphIndex,
  parallel_node: &Node,
  branch_edges: &[trellis_graph::Edge],
) -> Option<Node> {
  for edge in branch_edges {
    let Some(head) = graph.node(&edge.target) else {
      continue;
    };
    if head.node_type == "join" {
      return Some(head.clone());
    }
    for downstream in graph.outgoing(&head.id) {
      if let Some(candidate) = graph.node(&downstream.target) {
        if candidate.node_type == "join" {
          return Some(candidate.clone());
        }
      }
    }
  }
  debug!(parallel_id = %parallel_node.id, "no join node found past branch heads");
  None
}
