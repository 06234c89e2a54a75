pub mod builder;
pub mod dag;
pub mod scheduler;
pub mod signal;
pub mod vertex;
pub mod waiter;

pub use builder::{GraphBuilder, DEFAULT_TASK_TIMEOUT};
pub use dag::{Dag, DEFAULT_CONCURRENCY};
pub use signal::CompletionSignal;
pub use vertex::{work_fn, Vertex, Work};
pub use waiter::{run_bounded, WaitError};
