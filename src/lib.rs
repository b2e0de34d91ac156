//! Concurrent flow-record publishing pipeline.
//!
//! A single producer enqueues [`MessageBatch`]es into a bounded ring buffer;
//! a pool of worker threads converts every record to JSON and hands the
//! result to a shared [`network::Publisher`], which delivers it to the
//! message broker. [`Pipeline`] ties the pieces together.

pub mod codec;
pub mod message;
pub mod network;
pub mod service;
pub mod utils;

pub use message::MessageBatch;
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Pipeline, PipelineConfig,
    PipelineStats, Shutdown,
};
