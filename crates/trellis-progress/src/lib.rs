//! Trellis Progress
//!
//! Execution progress records and the shared cache the polling endpoint
//! reads. The executor (through a reporter) writes an [`ExecutionState`]
//! under `execution_<id>` after every step; clients poll it until the
//! status turns terminal. Entries expire five minutes after their last
//! update.

mod cache;
mod state;

pub use cache::ExecutionCache;
pub use state::{BranchStatus, ExecutionState, ExecutionStatus, TraceContext, TraceEntry};
