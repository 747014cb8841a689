use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use trellis_drivers::{Context, DriverRegistry};
use trellis_engine::Executor;
use trellis_graph::{Edge, Node};
use trellis_memory::{MemoryConfig, MemoryStore};
use trellis_progress::ExecutionCache;
use trellis_server::{AppState, Dispatcher};
use trellis_store::{SqliteStore, Store};

/// Trellis - a graph-driven workflow engine for AI agent pipelines
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trellis)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow from a JSON file and print the result
  Run {
    /// Path to the workflow file ({"nodes": [...], "edges": [...], "context"?: {...}})
    workflow_file: PathBuf,

    /// Node id to start from instead of the resolved start node
    #[arg(long)]
    start_node: Option<String>,
  },

  /// Start the HTTP server
  Serve {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// SQLite DSN for workflow/history storage (e.g. sqlite://trellis.db?mode=rwc)
    #[arg(long)]
    database: Option<String>,

    /// Redis URL for the memory store's remote backend (falls back to $REDIS_URL)
    #[arg(long)]
    redis: Option<String>,

    /// Number of execution workers
    #[arg(long, default_value_t = 4)]
    workers: usize,
  },
}

#[derive(serde::Deserialize)]
struct WorkflowFile {
  nodes: Vec<Node>,
  #[serde(default)]
  edges: Vec<Edge>,
  #[serde(default)]
  context: Context,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trellis=info,warn".into()),
    )
    .init();

  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir().map(|home| home.join(".trellis")).unwrap_or_else(|| PathBuf::from("."))
  });

  match cli.command {
    Some(Commands::Run { workflow_file, start_node }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(workflow_file, start_node))
    }
    Some(Commands::Serve { bind, database, redis, workers }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(serve(bind, database, redis, workers, data_dir))
    }
    None => {
      println!("trellis - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run_workflow(workflow_file: PathBuf, start_node: Option<String>) -> Result<()> {
  let content = tokio::fs::read_to_string(&workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  let workflow: WorkflowFile = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  let mut context = workflow.context;
  if let Some(input) = read_stdin_input()? {
    context.input = input;
  }

  let memory = Arc::new(MemoryStore::in_process());
  let registry = Arc::new(DriverRegistry::with_defaults(memory));
  let executor = Executor::new(registry);

  let outcome = executor
    .execute(&workflow.nodes, &workflow.edges, context, start_node.as_deref())
    .await;

  println!("{}", serde_json::to_string_pretty(&outcome)?);
  if outcome.is_ok() { Ok(()) } else { anyhow::bail!("workflow execution failed") }
}

/// Piped stdin becomes the workflow input: JSON when it parses, raw text
/// otherwise.
fn read_stdin_input() -> Result<Option<Value>> {
  let mut stdin = io::stdin();
  if stdin.is_terminal() {
    return Ok(None);
  }
  let mut buffer = String::new();
  stdin.read_to_string(&mut buffer)?;
  let trimmed = buffer.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }
  Ok(Some(
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())),
  ))
}

async fn serve(
  bind: SocketAddr,
  database: Option<String>,
  redis: Option<String>,
  workers: usize,
  data_dir: PathBuf,
) -> Result<()> {
  let database = match database {
    Some(url) => Some(url),
    None => {
      tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
      Some(format!("sqlite://{}?mode=rwc", data_dir.join("trellis.db").display()))
    }
  };

  let redis = redis.or_else(|| std::env::var("REDIS_URL").ok());
  let memory = Arc::new(MemoryStore::new(MemoryConfig {
    database_url: database.clone(),
    redis_url: redis,
    probe_interval: None,
  }));
  let registry = Arc::new(DriverRegistry::with_defaults(memory));
  let cache = Arc::new(ExecutionCache::new());

  let store: Option<Arc<dyn Store>> = match &database {
    Some(url) => {
      let store = SqliteStore::connect(url)
        .await
        .with_context(|| format!("failed to open store at {url}"))?;
      Some(Arc::new(store))
    }
    None => None,
  };

  let dispatcher = Dispatcher::spawn(
    workers,
    registry.clone(),
    cache.clone(),
    store.clone(),
    CancellationToken::new(),
  );

  let state = Arc::new(AppState { registry, cache, dispatcher, store });
  trellis_server::serve(state, bind).await?;
  Ok(())
}
