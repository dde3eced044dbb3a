//! Pool engine: worker threads, producer loop and the coordinating master loop.

pub mod pool;
pub mod producer;
pub mod stop;
pub mod worker;

pub use pool::{Pool, PoolConfig};
pub use producer::Producer;
pub use stop::StopSignal;
pub use worker::{WorkerContext, WorkerFn};
