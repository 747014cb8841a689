use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trellis_drivers::{Context, DriverRegistry};
use trellis_engine::{Executor, PollingReporter};
use trellis_graph::{Edge, Node};
use trellis_progress::ExecutionCache;
use trellis_store::{ExecutionStatus as HistoryStatus, Store};

/// Queued work for one workflow execution.
pub struct ExecutionJob {
  pub execution_id: String,
  pub nodes: Vec<Node>,
  pub edges: Vec<Edge>,
  pub context: Context,
  pub start_node_id: Option<String>,
  /// Set when the execution has a history row to update on completion.
  pub workflow_id: Option<String>,
}

enum Job {
  Ping(oneshot::Sender<()>),
  Execute(Box<ExecutionJob>),
}

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("task queue is unavailable")]
  QueueUnavailable,
}

/// Hands executions to a pool of worker tasks and answers liveness pings.
///
/// Dropping the dispatcher closes the queue; workers drain what is left
/// and exit. The shutdown token stops them mid-queue.
pub struct Dispatcher {
  tx: mpsc::Sender<Job>,
}

impl Dispatcher {
  /// Start `workers` worker tasks consuming a bounded queue.
  pub fn spawn(
    workers: usize,
    registry: Arc<DriverRegistry>,
    cache: Arc<ExecutionCache>,
    store: Option<Arc<dyn Store>>,
    shutdown: CancellationToken,
  ) -> Self {
    let (tx, rx) = mpsc::channel::<Job>(64);
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..workers.max(1) {
      let rx = rx.clone();
      let registry = registry.clone();
      let cache = cache.clone();
      let store = store.clone();
      let shutdown = shutdown.clone();

      tokio::spawn(async move {
        info!(worker_id, "execution worker started");
        loop {
          let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
              _ = shutdown.cancelled() => None,
              job = rx.recv() => job,
            }
          };
          match job {
            Some(Job::Ping(reply)) => {
              let _ = reply.send(());
            }
            Some(Job::Execute(job)) => {
              run_execution(*job, &registry, &cache, store.as_deref()).await;
            }
            None => {
              info!(worker_id, "execution worker stopping");
              return;
            }
          }
        }
      });
    }

    Self { tx }
  }

  /// Cheap worker liveness check: round-trip a ping through the queue.
  pub async fn ping(&self, timeout: Duration) -> bool {
    let (reply_tx, reply_rx) = oneshot::channel();
    if self.tx.try_send(Job::Ping(reply_tx)).is_err() {
      return false;
    }
    matches!(tokio::time::timeout(timeout, reply_rx).await, Ok(Ok(())))
  }

  /// Enqueue an execution without blocking the request handler.
  pub fn enqueue(&self, job: ExecutionJob) -> Result<(), DispatchError> {
    self
      .tx
      .try_send(Job::Execute(Box::new(job)))
      .map_err(|_| DispatchError::QueueUnavailable)
  }
}

/// Run one queued execution with a polling reporter and record the outcome.
///
/// The inner spawn is the internal-error boundary: a panicking driver or
/// kernel bug surfaces as a join error, which marks the cache entry and the
/// history row instead of killing the worker.
async fn run_execution(
  job: ExecutionJob,
  registry: &Arc<DriverRegistry>,
  cache: &Arc<ExecutionCache>,
  store: Option<&dyn Store>,
) {
  let execution_id = job.execution_id.clone();
  let started = Instant::now();
  info!(execution_id = %execution_id, nodes = job.nodes.len(), "executing workflow");

  let reporter = Arc::new(PollingReporter::new(cache.clone(), execution_id.clone()));
  let executor = Executor::with_reporter(registry.clone(), reporter);

  let handle = tokio::spawn(async move {
    executor
      .execute(&job.nodes, &job.edges, job.context, job.start_node_id.as_deref())
      .await
  });

  let elapsed_ms = || started.elapsed().as_millis() as i64;
  match handle.await {
    Ok(outcome) => {
      info!(
        execution_id = %execution_id,
        steps = outcome.steps,
        ok = outcome.is_ok(),
        "workflow finished"
      );
      if let Some(store) = store {
        let status =
          if outcome.is_ok() { HistoryStatus::Completed } else { HistoryStatus::Error };
        let trace = serde_json::to_value(&outcome.trace).unwrap_or_default();
        let final_output = serde_json::to_string(&outcome.final_value).ok();
        if let Err(err) = store
          .finish_execution(
            &execution_id,
            status,
            final_output,
            trace,
            outcome.error.clone(),
            elapsed_ms(),
          )
          .await
        {
          warn!(execution_id = %execution_id, error = %err, "history update failed");
        }
      }
    }
    Err(join_err) => {
      let message = format!("internal execution error: {join_err}");
      error!(execution_id = %execution_id, error = %message, "workflow crashed");
      cache.update(&execution_id, |state| {
        state.status = trellis_progress::ExecutionStatus::Error;
        state.error = Some(message.clone());
        state.current_node_id = None;
      });
      if let Some(store) = store {
        if let Err(err) = store
          .finish_execution(
            &execution_id,
            HistoryStatus::Error,
            None,
            serde_json::Value::Array(Vec::new()),
            Some(message),
            elapsed_ms(),
          )
          .await
        {
          warn!(execution_id = %execution_id, error = %err, "history update failed");
        }
      }
    }
  }
}
