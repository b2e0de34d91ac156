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

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::{self, Runtime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::network::{BrokerClient, RecordFrame, SendOutcome};
use crate::service::BrokerConfig;
use crate::{AppError, AppResult};

/// frames coalesced into one socket write
const MAX_WRITE_BATCH: usize = 64;

/// State shared between the client and its delivery task.
#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    outstanding: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    progress: Notify,
}

#[derive(Debug)]
struct Link {
    runtime: Runtime,
    tx: mpsc::Sender<Bytes>,
    writer: JoinHandle<()>,
    state: Arc<LinkState>,
}

/// [`BrokerClient`] publishing length-delimited [`RecordFrame`]s over TCP.
///
/// Sends only push into a bounded queue; a delivery task on a private
/// single-threaded runtime drains it into the socket.
#[derive(Debug)]
pub struct TcpBrokerClient {
    endpoint: String,
    topic: String,
    queue_capacity: usize,
    connect_timeout: Duration,
    link: Option<Link>,
}

impl TcpBrokerClient {
    pub fn new(config: &BrokerConfig) -> Self {
        TcpBrokerClient {
            endpoint: config.endpoint(),
            topic: config.topic.clone(),
            queue_capacity: config.queue_capacity.max(1),
            connect_timeout: config.connect_timeout(),
            link: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn outstanding(&self) -> usize {
        self.link
            .as_ref()
            .map_or(0, |link| link.state.outstanding.load(Ordering::Acquire))
    }
}

impl BrokerClient for TcpBrokerClient {
    fn connect(&mut self) -> AppResult<()> {
        if self.link.is_some() {
            self.disconnect();
        }

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("flowpipe-broker")
            .enable_all()
            .build()?;

        let endpoint = self.endpoint.clone();
        let stream = runtime
            .block_on(async {
                time::timeout(self.connect_timeout, TcpStream::connect(&endpoint)).await
            })
            .map_err(|_| {
                AppError::BrokerError(format!("connect to {} timed out", self.endpoint))
            })??;
        stream.set_nodelay(true)?;

        let state = Arc::new(LinkState::default());
        state.connected.store(true, Ordering::Release);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let writer = runtime.spawn(deliver(stream, rx, state.clone()));

        info!("connected to broker at {}", self.endpoint);
        self.link = Some(Link {
            runtime,
            tx,
            writer,
            state,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.state.connected.load(Ordering::Acquire))
    }

    fn send(&mut self, payload: &[u8]) -> SendOutcome {
        let Some(link) = &self.link else {
            return SendOutcome::Rejected("not connected".to_string());
        };
        if !link.state.connected.load(Ordering::Acquire) {
            return SendOutcome::Rejected("connection lost".to_string());
        }
        let frame = match RecordFrame::encode(&self.topic, payload) {
            Ok(frame) => frame,
            Err(err) => return SendOutcome::Rejected(err.to_string()),
        };

        // counted before the hand-off so the delivery task never sees it negative
        link.state.outstanding.fetch_add(1, Ordering::AcqRel);
        match link.tx.try_send(frame) {
            Ok(()) => SendOutcome::Enqueued,
            Err(TrySendError::Full(_)) => {
                link.state.outstanding.fetch_sub(1, Ordering::AcqRel);
                SendOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => {
                link.state.outstanding.fetch_sub(1, Ordering::AcqRel);
                SendOutcome::Rejected("delivery task stopped".to_string())
            }
        }
    }

    fn poll(&mut self, timeout: Duration) {
        let Some(link) = &self.link else {
            return;
        };
        if timeout.is_zero() || link.state.outstanding.load(Ordering::Acquire) == 0 {
            return;
        }
        let state = link.state.clone();
        link.runtime.block_on(async move {
            let _ = time::timeout(timeout, state.progress.notified()).await;
        });
    }

    fn flush(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let outstanding = self.outstanding();
            let now = Instant::now();
            if outstanding == 0 || now >= deadline {
                return outstanding;
            }
            self.poll((deadline - now).min(Duration::from_millis(100)));
        }
    }

    fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let Link {
            runtime,
            tx,
            writer,
            state,
        } = link;

        // closing the queue lets the delivery task finish what it holds
        drop(tx);
        runtime.block_on(async {
            if time::timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("delivery task still busy at disconnect");
            }
        });
        runtime.shutdown_timeout(Duration::from_secs(1));

        state.connected.store(false, Ordering::Release);
        info!(
            delivered = state.delivered.load(Ordering::Relaxed),
            failed = state.failed.load(Ordering::Relaxed),
            "disconnected from broker at {}",
            self.endpoint
        );
    }
}

impl Drop for TcpBrokerClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn deliver(mut stream: TcpStream, mut rx: mpsc::Receiver<Bytes>, state: Arc<LinkState>) {
    let mut batch = BytesMut::new();
    while let Some(frame) = rx.recv().await {
        batch.clear();
        batch.extend_from_slice(&frame);
        let mut count = 1;
        while count < MAX_WRITE_BATCH {
            match rx.try_recv() {
                Ok(frame) => {
                    batch.extend_from_slice(&frame);
                    count += 1;
                }
                Err(_) => break,
            }
        }

        match stream.write_all(&batch).await {
            Ok(()) => {
                trace!(messages = count, bytes = batch.len(), "messages delivered");
                state.delivered.fetch_add(count as u64, Ordering::Relaxed);
                state.outstanding.fetch_sub(count, Ordering::AcqRel);
                state.progress.notify_one();
            }
            Err(err) => {
                warn!(messages = count, "message delivery failed: {}", err);
                state.connected.store(false, Ordering::Release);
                rx.close();
                while rx.try_recv().is_ok() {
                    count += 1;
                }
                state.failed.fetch_add(count as u64, Ordering::Relaxed);
                state.outstanding.fetch_sub(count, Ordering::AcqRel);
                state.progress.notify_one();
                return;
            }
        }
    }
    let _ = stream.shutdown().await;
}
