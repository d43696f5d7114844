pub mod query_flow;

pub use query_flow::{AsyncExecutor, BlockingExecutor, ExecutorCore};
