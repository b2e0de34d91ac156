pub use app_error::{AppError, AppResult};
pub use config::{
    BrokerConfig, FormatConfig, LogConfig, PipelineConfig, ProcessingConfig, ProtocolFormat,
    TcpFlagsFormat, TimestampFormat, MIN_BACKOFF_MS, MIN_BUFFER_SIZE,
};
pub use pipeline::{Pipeline, PipelineStats};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};
pub use worker::WorkerStatsSnapshot;

mod app_error;
mod config;
mod pipeline;
mod shutdown;
mod tracing_config;
mod worker;
