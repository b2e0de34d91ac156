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

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Upper bound for one frame body.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// One published message on the wire:
/// `u32` body length, `u16` topic length, topic, payload (all big endian).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    pub topic: String,
    pub payload: Bytes,
}

impl RecordFrame {
    pub fn encode(topic: &str, payload: &[u8]) -> AppResult<Bytes> {
        let topic_len = u16::try_from(topic.len()).map_err(|_| {
            AppError::InvalidValue(format!("topic of {} bytes is too long", topic.len()))
        })?;
        let body_size = 2 + topic.len() + payload.len();
        if body_size > MAX_FRAME_SIZE {
            return Err(AppError::InvalidValue(format!(
                "Frame of length {} is too large.",
                body_size
            )));
        }

        let mut frame = BytesMut::with_capacity(4 + body_size);
        frame.put_u32(body_size as u32);
        frame.put_u16(topic_len);
        frame.put_slice(topic.as_bytes());
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    /// Checks whether `buffer` starts with a complete frame.
    pub fn check(buffer: &mut BytesMut) -> AppResult<()> {
        if buffer.remaining() < 4 {
            return Err(Incomplete);
        }
        let body_size = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        if body_size > MAX_FRAME_SIZE {
            return Err(AppError::InvalidValue(format!(
                "Frame of length {} is too large.",
                body_size
            )));
        }
        if body_size < 2 {
            return Err(AppError::InvalidValue(format!(
                "frame body of {} bytes cannot hold a topic length",
                body_size
            )));
        }
        if buffer.remaining() < body_size + 4 {
            buffer.reserve(body_size + 4 - buffer.remaining());
            return Err(Incomplete);
        }
        Ok(())
    }

    /// Splits one frame off the front of `buffer`, or returns `None` until
    /// enough bytes arrived.
    pub fn parse(buffer: &mut BytesMut) -> AppResult<Option<RecordFrame>> {
        match RecordFrame::check(buffer) {
            Ok(()) => {
                let body_size = buffer.get_u32() as usize;
                let mut body = buffer.split_to(body_size);
                let topic_len = body.get_u16() as usize;
                if topic_len > body.remaining() {
                    return Err(AppError::InvalidValue(format!(
                        "topic length {} exceeds frame body of {} bytes",
                        topic_len,
                        body.remaining() + 2
                    )));
                }
                let topic = body.split_to(topic_len);
                let topic = String::from_utf8(topic.to_vec()).map_err(|err| {
                    AppError::InvalidValue(format!("topic is not valid utf-8: {}", err))
                })?;
                Ok(Some(RecordFrame {
                    topic,
                    payload: body.freeze(),
                }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
