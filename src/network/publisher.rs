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
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::network::{BrokerClient, SendOutcome};
use crate::service::BrokerConfig;
use crate::utils::Backoff;
use crate::{AppError, AppResult, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Disconnected,
    Connected,
    /// flushed and disconnected for good
    Closed,
}

/// What happened to one payload handed to [`Publisher::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// accepted by the broker client after `retries` queue-full rounds
    Enqueued { retries: u32 },
    /// empty payload, only delivery reports were served
    Empty,
    /// the broker client refused the message
    Rejected,
    /// not connected, or shutdown interrupted a queue-full retry
    Dropped,
}

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub flush_timeout: Duration,
    pub retry_backoff_initial: Duration,
    pub retry_backoff_max: Duration,
    pub reconnect_backoff_initial: Duration,
    pub reconnect_backoff_max: Duration,
}

impl From<&BrokerConfig> for PublisherSettings {
    fn from(config: &BrokerConfig) -> Self {
        PublisherSettings {
            flush_timeout: config.flush_timeout(),
            retry_backoff_initial: Duration::from_millis(config.retry_backoff_initial_ms),
            retry_backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
            reconnect_backoff_initial: Duration::from_millis(config.reconnect_backoff_initial_ms),
            reconnect_backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
        }
    }
}

#[derive(Debug, Default)]
struct PublisherStats {
    enqueued: AtomicU64,
    queue_full_retries: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    empty: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStatsSnapshot {
    pub enqueued: u64,
    pub queue_full_retries: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub empty: u64,
}

struct Inner {
    client: Box<dyn BrokerClient>,
    state: PublisherState,
    reconnect: Backoff,
    next_reconnect: Option<Instant>,
    /// messages dropped since the last connection attempt
    dropped_while_down: u64,
}

/// Serializes every worker's access to the broker client.
///
/// Holds the lock for a whole `send`, including queue-full retries, so a
/// congested broker throttles all workers at once.
pub struct Publisher {
    inner: Mutex<Inner>,
    settings: PublisherSettings,
    shutdown: Shutdown,
    stats: PublisherStats,
}

impl Publisher {
    pub fn new(
        client: Box<dyn BrokerClient>,
        settings: PublisherSettings,
        shutdown: Shutdown,
    ) -> Self {
        let reconnect = Backoff::new(
            settings.reconnect_backoff_initial,
            settings.reconnect_backoff_max,
        )
        .with_jitter();
        Publisher {
            inner: Mutex::new(Inner {
                client,
                state: PublisherState::Disconnected,
                reconnect,
                next_reconnect: None,
                dropped_while_down: 0,
            }),
            settings,
            shutdown,
            stats: PublisherStats::default(),
        }
    }

    pub fn state(&self) -> PublisherState {
        self.inner.lock().state
    }

    pub fn connect(&self) -> AppResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            PublisherState::Connected => return Ok(()),
            PublisherState::Closed => {
                return Err(AppError::IllegalStateError(
                    "publisher already closed".to_string(),
                ))
            }
            PublisherState::Disconnected => {}
        }
        match inner.client.connect() {
            Ok(()) => {
                Self::mark_connected(&mut inner);
                Ok(())
            }
            Err(err) => {
                let delay = inner.reconnect.next_delay();
                inner.next_reconnect = Some(Instant::now() + delay);
                Err(err)
            }
        }
    }

    /// Publishes one payload.
    ///
    /// Retries for as long as the client reports a full queue, backing off
    /// between rounds while serving delivery reports, until the message is
    /// taken or shutdown is requested.
    pub fn send(&self, payload: &[u8]) -> PublishOutcome {
        let mut inner = self.inner.lock();
        if !self.ensure_connected(&mut inner) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            if inner.state == PublisherState::Closed {
                warn!("publisher closed, dropping message");
            } else {
                inner.dropped_while_down += 1;
                // the next attempt reports the total
                if inner.dropped_while_down == 1 {
                    warn!(
                        "broker unavailable, dropping messages until the next reconnect attempt"
                    );
                }
            }
            return PublishOutcome::Dropped;
        }
        if payload.is_empty() {
            inner.client.poll(Duration::ZERO);
            self.stats.empty.fetch_add(1, Ordering::Relaxed);
            return PublishOutcome::Empty;
        }

        let mut backoff = Backoff::new(
            self.settings.retry_backoff_initial,
            self.settings.retry_backoff_max,
        );
        let mut retries = 0;
        loop {
            match inner.client.send(payload) {
                SendOutcome::Enqueued => {
                    self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                    if retries > 0 {
                        debug!("message enqueued after {} queue-full retries", retries);
                    }
                    return PublishOutcome::Enqueued { retries };
                }
                SendOutcome::QueueFull => {
                    if self.shutdown.is_shutdown() {
                        warn!("broker queue still full at shutdown, dropping message");
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        return PublishOutcome::Dropped;
                    }
                    retries += 1;
                    self.stats.queue_full_retries.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_delay();
                    inner.client.poll(delay);
                }
                SendOutcome::Rejected(reason) => {
                    error!("failed to enqueue message for production: {}", reason);
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    return PublishOutcome::Rejected;
                }
            }
        }
    }

    /// Waits for outstanding deliveries, then disconnects. Only the first
    /// call does anything; it returns how many messages stayed undelivered.
    pub fn flush_and_disconnect(&self) -> usize {
        let mut inner = self.inner.lock();
        let remaining = match inner.state {
            PublisherState::Closed => return 0,
            PublisherState::Disconnected => 0,
            PublisherState::Connected => {
                info!("flushing last messages");
                inner.client.flush(self.settings.flush_timeout)
            }
        };
        if remaining > 0 {
            warn!(
                "{} message(s) not delivered within {:?}",
                remaining, self.settings.flush_timeout
            );
        }
        inner.client.disconnect();
        inner.state = PublisherState::Closed;
        info!("publisher closed");
        remaining
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            queue_full_retries: self.stats.queue_full_retries.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            empty: self.stats.empty.load(Ordering::Relaxed),
        }
    }

    fn ensure_connected(&self, inner: &mut Inner) -> bool {
        match inner.state {
            PublisherState::Closed => false,
            PublisherState::Connected if inner.client.is_connected() => true,
            PublisherState::Connected => {
                warn!("broker connection lost");
                inner.state = PublisherState::Disconnected;
                inner.next_reconnect = None;
                Self::try_reconnect(inner)
            }
            PublisherState::Disconnected => Self::try_reconnect(inner),
        }
    }

    fn try_reconnect(inner: &mut Inner) -> bool {
        if inner
            .next_reconnect
            .is_some_and(|at| Instant::now() < at)
        {
            return false;
        }
        if inner.dropped_while_down > 0 {
            warn!(
                "{} message(s) dropped while the broker was unavailable",
                inner.dropped_while_down
            );
            inner.dropped_while_down = 0;
        }
        match inner.client.connect() {
            Ok(()) => {
                info!("reconnected to broker");
                Self::mark_connected(inner);
                true
            }
            Err(err) => {
                let delay = inner.reconnect.next_delay();
                warn!(
                    "reconnect to broker failed: {}, next attempt in {:?}",
                    err, delay
                );
                inner.next_reconnect = Some(Instant::now() + delay);
                false
            }
        }
    }

    fn mark_connected(inner: &mut Inner) {
        inner.state = PublisherState::Connected;
        inner.reconnect.reset();
        inner.next_reconnect = None;
    }
}
