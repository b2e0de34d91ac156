pub use backoff::Backoff;
pub use ring_buffer::RingBuffer;
pub use worker_pool::{PoolHandler, WorkerPool};

mod backoff;
mod ring_buffer;
mod worker_pool;
