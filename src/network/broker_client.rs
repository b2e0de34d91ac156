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

use std::time::Duration;

use crate::AppResult;

/// Result of handing one message to the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// accepted into the client's outbound queue
    Enqueued,
    /// outbound queue is full; poll and retry
    QueueFull,
    /// any other failure; the message will not be delivered
    Rejected(String),
}

/// Low-level connection to the message broker.
///
/// Implementations are driven by [`Publisher`](super::Publisher), which
/// serializes every call behind its own lock; a client therefore never
/// sees concurrent calls.
pub trait BrokerClient: Send {
    fn connect(&mut self) -> AppResult<()>;

    fn is_connected(&self) -> bool;

    /// Queues one message for asynchronous delivery.
    fn send(&mut self, payload: &[u8]) -> SendOutcome;

    /// Serves delivery reports, waiting at most `timeout` for progress.
    fn poll(&mut self, timeout: Duration);

    /// Waits at most `timeout` for outstanding messages and returns how
    /// many are still undelivered.
    fn flush(&mut self, timeout: Duration) -> usize;

    fn disconnect(&mut self);
}
