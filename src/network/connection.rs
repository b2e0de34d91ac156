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

use std::io::{self, ErrorKind};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, error};

use crate::network::RecordFrame;
use crate::{AppError, AppResult};

/// Receiving end of a publisher connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    pub peer: String,
}

impl Connection {
    pub fn new(stream: TcpStream, buffer_size: usize) -> Connection {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Connection {
            stream,
            buffer: BytesMut::with_capacity(buffer_size),
            peer,
        }
    }

    /// Reads the next [`RecordFrame`].
    ///
    /// Returns `None` when the peer closed the connection between frames and
    /// an error when it closed in the middle of one.
    pub async fn read_frame(&mut self) -> AppResult<Option<RecordFrame>> {
        loop {
            if let Some(frame) = RecordFrame::parse(&mut self.buffer)? {
                return Ok(Some(frame));
            }
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}

/// Minimal broker endpoint: accepts publisher connections and hands every
/// received frame to a callback. Used for local runs and tests.
#[derive(Debug)]
pub struct FrameSink {
    listener: TcpListener,
}

impl FrameSink {
    pub async fn bind(addr: &str) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(FrameSink { listener })
    }

    pub fn local_addr(&self) -> AppResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until accepting keeps failing.
    pub async fn run<F>(&self, on_frame: F) -> AppResult<()>
    where
        F: Fn(RecordFrame) + Clone + Send + 'static,
    {
        loop {
            let socket = self.accept().await?;
            let mut connection = Connection::new(socket, 4 * 1024);
            let on_frame = on_frame.clone();
            debug!("accept new connection from {}", connection.peer);

            tokio::spawn(async move {
                loop {
                    match connection.read_frame().await {
                        Ok(Some(frame)) => on_frame(frame),
                        Ok(None) => break,
                        Err(err) => {
                            error!("Connection error from {}: {:?}", connection.peer, err);
                            break;
                        }
                    }
                }
                debug!("connection from {} closed", connection.peer);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::IoError(err));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}
