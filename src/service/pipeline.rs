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

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::codec::{Codec, FormatFlags, JsonCodec};
use crate::message::MessageBatch;
use crate::network::{
    BrokerClient, Publisher, PublisherSettings, PublisherState, PublisherStatsSnapshot,
    TcpBrokerClient,
};
use crate::service::worker::{ConversionWorker, WorkerStats, WorkerStatsSnapshot};
use crate::service::{PipelineConfig, ProcessingConfig};
use crate::utils::{RingBuffer, WorkerPool};
use crate::{AppError, AppResult, Shutdown};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// batches waiting in the ring buffer
    pub pending_batches: usize,
    pub workers: WorkerStatsSnapshot,
    pub publisher: PublisherStatsSnapshot,
}

/// Owns the ring buffer, the worker pool and the publisher.
///
/// A single producer feeds batches through [`enqueue`](Pipeline::enqueue);
/// between [`start`](Pipeline::start) and [`stop`](Pipeline::stop) the
/// workers convert and publish them. Dropping a started pipeline stops it.
pub struct Pipeline {
    ring: Arc<RingBuffer<MessageBatch>>,
    publisher: Arc<Publisher>,
    codec: Arc<dyn Codec>,
    shutdown: Shutdown,
    worker_stats: Arc<WorkerStats>,
    processing: ProcessingConfig,
    ignore_options: bool,
    pool: Option<WorkerPool>,
    started: bool,
    stopped: bool,
}

impl Pipeline {
    /// Uses `config` as given; floors are applied when the configuration is
    /// loaded from a file.
    pub fn new(
        config: &PipelineConfig,
        codec: Arc<dyn Codec>,
        client: Box<dyn BrokerClient>,
    ) -> Self {
        let shutdown = Shutdown::new();
        let publisher = Publisher::new(
            client,
            PublisherSettings::from(&config.broker),
            shutdown.clone(),
        );
        Pipeline {
            ring: Arc::new(RingBuffer::new(config.processing.messages_buffer_size.max(1))),
            publisher: Arc::new(publisher),
            codec,
            shutdown,
            worker_stats: Arc::default(),
            processing: config.processing.clone(),
            ignore_options: config.format.ignore_options,
            pool: None,
            started: false,
            stopped: false,
        }
    }

    /// JSON codec and TCP broker client, both configured from `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let codec = JsonCodec::new(FormatFlags::from(&config.format));
        let client = TcpBrokerClient::new(&config.broker);
        Pipeline::new(config, Arc::new(codec), Box::new(client))
    }

    /// Hands a batch to the workers, blocking while the ring buffer is full.
    ///
    /// The batch comes back only once the pipeline has been stopped.
    pub fn enqueue(&self, batch: MessageBatch) -> Result<(), MessageBatch> {
        self.ring.enqueue(batch)
    }

    /// Connects the publisher and spawns the workers.
    ///
    /// A failed connection is not an error: the returned state says so and
    /// the publisher keeps retrying in the background of `send`.
    pub fn start(&mut self) -> AppResult<PublisherState> {
        if self.started {
            return Err(AppError::IllegalStateError(
                "pipeline already started".to_string(),
            ));
        }
        if self.stopped {
            return Err(AppError::IllegalStateError(
                "pipeline already stopped".to_string(),
            ));
        }
        self.started = true;

        let state = match self.publisher.connect() {
            Ok(()) => PublisherState::Connected,
            Err(err) => {
                error!("failed to connect to broker: {}", err);
                PublisherState::Disconnected
            }
        };

        let worker = ConversionWorker {
            ring: self.ring.clone(),
            publisher: self.publisher.clone(),
            codec: self.codec.clone(),
            shutdown: self.shutdown.clone(),
            stats: self.worker_stats.clone(),
            ignore_options: self.ignore_options,
            initial_length: self.processing.process_message_length,
            max_length: self
                .processing
                .max_message_length
                .max(self.processing.process_message_length),
        };
        let workers = self.processing.worker_count();
        let mut pool = WorkerPool::new("flowpipe");
        let spawned = pool.spawn(workers, worker);
        self.pool = Some(pool);
        if let Err(err) = spawned {
            error!("failed to spawn workers: {}", err);
            self.stop();
            return Err(AppError::ThreadError(err.to_string()));
        }

        info!(
            workers,
            capacity = self.ring.capacity(),
            "pipeline started, broker {:?}",
            state
        );
        Ok(state)
    }

    /// Stops the workers after their current batch, then flushes and
    /// disconnects the publisher. Later calls do nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown.trigger();
        info!("pipeline stopping");
        self.ring.close();

        if let Some(pool) = self.pool.take() {
            let panicked = pool.join_all();
            if panicked > 0 {
                error!("{} worker(s) panicked", panicked);
            }
        }
        let pending = self.ring.len();
        if pending > 0 {
            warn!("{} batch(es) left unprocessed", pending);
        }

        self.publisher.flush_and_disconnect();
        info!("pipeline stopped");
    }

    /// Waits until the workers claimed every enqueued batch, at most `timeout`.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.ring.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.started && !self.stopped
    }

    pub fn publisher_state(&self) -> PublisherState {
        self.publisher.state()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            pending_batches: self.ring.len(),
            workers: self.worker_stats.snapshot(),
            publisher: self.publisher.stats(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.started {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, ScratchBuffer};
    use crate::message::{ElementRegistry, Record};
    use crate::network::SendOutcome;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        flushes: usize,
        disconnects: usize,
    }

    struct CountingClient {
        calls: Arc<Mutex<Calls>>,
        connected: bool,
    }

    impl BrokerClient for CountingClient {
        fn connect(&mut self) -> AppResult<()> {
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send(&mut self, _payload: &[u8]) -> SendOutcome {
            SendOutcome::Enqueued
        }

        fn poll(&mut self, _timeout: Duration) {}

        fn flush(&mut self, _timeout: Duration) -> usize {
            self.calls.lock().flushes += 1;
            0
        }

        fn disconnect(&mut self) {
            self.connected = false;
            self.calls.lock().disconnects += 1;
        }
    }

    struct NoopCodec;

    impl Codec for NoopCodec {
        fn convert(
            &self,
            _record: &Record,
            _elements: &ElementRegistry,
            _out: &mut ScratchBuffer,
        ) -> Result<usize, CodecError> {
            Ok(0)
        }
    }

    #[test]
    fn test_stop_cleans_up_after_shutdown_was_already_signalled() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let client = CountingClient {
            calls: calls.clone(),
            connected: false,
        };
        let mut config = PipelineConfig::default();
        config.processing.worker_threads = 2;
        config.processing.messages_buffer_size = 4;
        config.broker.flush_timeout_ms = 100;
        let mut pipeline = Pipeline::new(&config, Arc::new(NoopCodec), Box::new(client));
        pipeline.start().unwrap();

        // a failed start signals shutdown before anyone calls stop
        pipeline.shutdown.trigger();
        pipeline.stop();

        assert!(pipeline.pool.is_none());
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.publisher_state(), PublisherState::Closed);
        let calls = calls.lock();
        assert_eq!(calls.flushes, 1);
        assert_eq!(calls.disconnects, 1);
    }
}
