// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

extern crate config as _;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{AppError, AppResult};

/// Smallest accepted ring capacity and initial conversion buffer length.
pub const MIN_BUFFER_SIZE: usize = 256;

/// Smallest accepted retry and reconnect backoff, in milliseconds.
pub const MIN_BACKOFF_MS: u64 = 1;

fn floor_backoff(key: &str, value: &mut u64) {
    if *value < MIN_BACKOFF_MS {
        warn!("{} {} below minimum, using {}", key, value, MIN_BACKOFF_MS);
        *value = MIN_BACKOFF_MS;
    }
}

/// Accepts `val_true` or `val_false`, ignoring ASCII case.
fn check_or(elem: &str, value: &str, val_true: &str, val_false: &str) -> AppResult<bool> {
    if value.eq_ignore_ascii_case(val_true) {
        return Ok(true);
    }
    if value.eq_ignore_ascii_case(val_false) {
        return Ok(false);
    }
    Err(AppError::InvalidValue(format!(
        "unexpected parameter of the element <{elem}> (expected '{val_true}' or '{val_false}', got '{value}')"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum TcpFlagsFormat {
    Formatted,
    Raw,
}

impl TryFrom<String> for TcpFlagsFormat {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        check_or("tcp_flags", &value, "formatted", "raw")
            .map(|formatted| if formatted { Self::Formatted } else { Self::Raw })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum TimestampFormat {
    Formatted,
    Unix,
}

impl TryFrom<String> for TimestampFormat {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        check_or("timestamp", &value, "formatted", "unix")
            .map(|formatted| if formatted { Self::Formatted } else { Self::Unix })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum ProtocolFormat {
    Formatted,
    Raw,
}

impl TryFrom<String> for ProtocolFormat {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        check_or("protocol", &value, "formatted", "raw")
            .map(|formatted| if formatted { Self::Formatted } else { Self::Raw })
    }
}

/// Shape of the produced JSON documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub tcp_flags: TcpFlagsFormat,
    pub timestamp: TimestampFormat,
    pub protocol: ProtocolFormat,
    /// Skip fields without a known element definition.
    pub ignore_unknown: bool,
    /// Skip records described by an options template.
    pub ignore_options: bool,
    /// Keep control characters in string fields (escaped) instead of stripping them.
    pub non_printable_char: bool,
    /// Name every field `en{pen}:id{id}`.
    pub numeric_names: bool,
    /// Render octetArray fields of at most 8 bytes as unsigned integers.
    pub octet_array_as_uint: bool,
    /// Skip the reverse direction of biflow records.
    pub split_biflow: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            tcp_flags: TcpFlagsFormat::Formatted,
            timestamp: TimestampFormat::Formatted,
            protocol: ProtocolFormat::Formatted,
            ignore_unknown: true,
            ignore_options: true,
            non_printable_char: true,
            numeric_names: false,
            octet_array_as_uint: true,
            split_biflow: false,
        }
    }
}

/// Broker endpoint and publishing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// Messages the client may hold before `send` reports a full queue.
    pub queue_capacity: usize,
    pub connect_timeout_ms: u64,
    pub flush_timeout_ms: u64,
    pub retry_backoff_initial_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub reconnect_backoff_initial_ms: u64,
    pub reconnect_backoff_max_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9092,
            topic: "netflow".to_string(),
            queue_capacity: 100_000,
            connect_timeout_ms: 5_000,
            flush_timeout_ms: 10_000,
            retry_backoff_initial_ms: 10,
            retry_backoff_max_ms: 1_000,
            reconnect_backoff_initial_ms: 100,
            reconnect_backoff_max_ms: 30_000,
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Raises zero backoffs to [`MIN_BACKOFF_MS`].
    pub fn normalize(&mut self) {
        floor_backoff("retry_backoff_initial_ms", &mut self.retry_backoff_initial_ms);
        floor_backoff("retry_backoff_max_ms", &mut self.retry_backoff_max_ms);
        floor_backoff(
            "reconnect_backoff_initial_ms",
            &mut self.reconnect_backoff_initial_ms,
        );
        floor_backoff("reconnect_backoff_max_ms", &mut self.reconnect_backoff_max_ms);
        self.retry_backoff_max_ms = self.retry_backoff_max_ms.max(self.retry_backoff_initial_ms);
        self.reconnect_backoff_max_ms = self
            .reconnect_backoff_max_ms
            .max(self.reconnect_backoff_initial_ms);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Initial size of each worker's conversion buffer.
    pub process_message_length: usize,
    /// Ring buffer capacity in batches.
    pub messages_buffer_size: usize,
    /// Upper bound a conversion buffer may grow to.
    pub max_message_length: usize,
    /// Worker thread count, 0 means one per CPU.
    pub worker_threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            process_message_length: 1024,
            messages_buffer_size: 1024,
            max_message_length: 1024 * 1024,
            worker_threads: 0,
        }
    }
}

impl ProcessingConfig {
    /// Raises undersized values to their floors.
    pub fn normalize(&mut self) {
        if self.process_message_length < MIN_BUFFER_SIZE {
            warn!(
                "process_message_length {} below minimum, using {}",
                self.process_message_length, MIN_BUFFER_SIZE
            );
            self.process_message_length = MIN_BUFFER_SIZE;
        }
        if self.messages_buffer_size < MIN_BUFFER_SIZE {
            warn!(
                "messages_buffer_size {} below minimum, using {}",
                self.messages_buffer_size, MIN_BUFFER_SIZE
            );
            self.messages_buffer_size = MIN_BUFFER_SIZE;
        }
        if self.max_message_length < self.process_message_length {
            self.max_message_length = self.process_message_length;
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: String,
    pub file_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_name: "flowpipe.log".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub format: FormatConfig,
    pub broker: BrokerConfig,
    pub processing: ProcessingConfig,
    pub log: LogConfig,
}

impl PipelineConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<PipelineConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let mut pipeline_config: PipelineConfig = config.try_deserialize()?;
        pipeline_config.processing.normalize();
        pipeline_config.broker.normalize();

        Ok(pipeline_config)
    }
}
