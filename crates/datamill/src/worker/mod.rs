pub mod dispatch;
pub mod pool;

pub use dispatch::{
    recover_interrupted, sweep_pending, InlineDispatcher, JobDispatcher, INTERRUPTED_MESSAGE,
};
pub use pool::WorkerPool;
