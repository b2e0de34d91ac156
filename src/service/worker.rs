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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::codec::{Codec, CodecError, ScratchBuffer};
use crate::message::{ElementRegistry, MessageBatch, Record};
use crate::network::Publisher;
use crate::utils::{PoolHandler, RingBuffer};
use crate::Shutdown;

#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    batches: AtomicU64,
    converted: AtomicU64,
    skipped_options: AtomicU64,
    codec_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub batches: u64,
    pub converted: u64,
    pub skipped_options: u64,
    pub codec_failures: u64,
}

impl WorkerStats {
    pub(crate) fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            converted: self.converted.load(Ordering::Relaxed),
            skipped_options: self.skipped_options.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
        }
    }
}

/// Pulls batches off the ring, converts every record and publishes the
/// result. Each pool thread runs its own clone with a private scratch buffer.
#[derive(Clone)]
pub(crate) struct ConversionWorker {
    pub(crate) ring: Arc<RingBuffer<MessageBatch>>,
    pub(crate) publisher: Arc<Publisher>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) shutdown: Shutdown,
    pub(crate) stats: Arc<WorkerStats>,
    pub(crate) ignore_options: bool,
    pub(crate) initial_length: usize,
    pub(crate) max_length: usize,
}

impl PoolHandler for ConversionWorker {
    fn run(self, worker_id: usize) {
        let mut scratch = ScratchBuffer::with_capacity(self.initial_length);
        while !self.shutdown.is_shutdown() {
            let Some(batch) = self.ring.dequeue_wait() else {
                break;
            };
            self.process_batch(worker_id, batch, &mut scratch);
        }
        debug!(
            "worker {} stopped, scratch buffer at {} bytes",
            worker_id,
            scratch.capacity()
        );
    }
}

impl ConversionWorker {
    /// Converts and publishes the records of one batch in order, then drops it.
    fn process_batch(&self, worker_id: usize, batch: MessageBatch, scratch: &mut ScratchBuffer) {
        trace!(worker_id, records = batch.len(), "processing batch");
        for (index, record) in batch.records().iter().enumerate() {
            if self.ignore_options && record.is_options() {
                self.stats.skipped_options.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match self.convert(record, batch.elements(), scratch) {
                Ok(len) => {
                    self.stats.converted.fetch_add(1, Ordering::Relaxed);
                    self.publisher.send(scratch.filled(len));
                }
                Err(err) => {
                    self.stats.codec_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        worker_id,
                        record = index,
                        template = record.template.id,
                        "record conversion failed: {}",
                        err
                    );
                }
            }
        }
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs the codec, growing the scratch buffer for as long as it asks
    /// for more room and the size limit allows.
    fn convert(
        &self,
        record: &Record,
        elements: &ElementRegistry,
        scratch: &mut ScratchBuffer,
    ) -> Result<usize, CodecError> {
        loop {
            match self.codec.convert(record, elements, scratch) {
                Err(CodecError::BufferTooSmall { required }) => {
                    if !scratch.grow(required, self.max_length) {
                        return Err(CodecError::BufferTooSmall { required });
                    }
                    debug!("conversion buffer grown to {} bytes", scratch.capacity());
                }
                result => return result,
            }
        }
    }
}
