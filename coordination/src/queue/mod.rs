//! C4 — Work Queue: ordered, persistent task registry with status/attempt
//! lifecycle (§4.4).

mod store;
mod types;

pub use store::WorkQueue;
pub use types::{Queue, QueueStats, Task, TaskStatus, TaskType};
