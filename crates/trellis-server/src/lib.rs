//! Trellis Server
//!
//! The HTTP surface and the async dispatcher behind it.
//!
//! # Endpoints
//!
//! - `POST /execute-node` - run a single node through its driver
//! - `POST /execute-workflow` - synchronous execution, full result body
//! - `POST /execute-workflow-async` - enqueue and return an execution id
//! - `GET /execution/{id}/status` - poll the progress cache
//! - `POST /workflows/{id}/trigger` - API-key gated external trigger
//! - `GET /health` - liveness
//!
//! The dispatcher owns a small pool of worker tasks behind an mpsc queue.
//! The async endpoint pings the queue (1 s budget) before enqueuing so a
//! dead pool surfaces as 503 instead of a black hole.

mod dispatch;
mod routes;

pub use dispatch::{DispatchError, Dispatcher, ExecutionJob};
pub use routes::{AppState, router, serve};
