//! Task scheduling: the priority queue, the dispatcher, and per-kind
//! execution strategies.

pub mod queue;
pub mod scheduler;
pub mod strategies;
pub mod task;

pub use queue::{CANCELLED_REASON, CancelOutcome, TaskQueue};
pub use scheduler::PipelineScheduler;
pub use strategies::TaskExecutor;
pub use task::{ProcessingTask, TaskKind, TaskStatus};
