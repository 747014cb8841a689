mod condition;
mod for_each;
mod input;
mod join;
mod loop_node;
mod memory;
mod output;
mod parallel;
mod router;
mod subwalk;
mod tool;

pub use condition::ConditionDriver;
pub use for_each::ForEachDriver;
pub use input::InputDriver;
pub use join::JoinDriver;
pub use loop_node::LoopDriver;
pub use memory::MemoryDriver;
pub use output::OutputDriver;
pub use parallel::ParallelDriver;
pub use router::RouterDriver;
pub use tool::ToolDriver;
