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

/// Conversion output area owned by exactly one worker thread.
///
/// Codecs write into the whole slice and report how many bytes they
/// produced; the buffer only grows when a codec reports it is too small.
#[derive(Debug)]
pub struct ScratchBuffer {
    buf: Vec<u8>,
}

impl ScratchBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// The first `len` bytes written by the last conversion.
    pub fn filled(&self, len: usize) -> &[u8] {
        &self.buf[..len.min(self.buf.len())]
    }

    /// Grows to `required` bytes (or doubles when unknown) without exceeding
    /// `limit`. Returns false when the buffer is already at the limit.
    pub fn grow(&mut self, required: Option<usize>, limit: usize) -> bool {
        let current = self.buf.len();
        if current >= limit {
            return false;
        }
        let target = required
            .unwrap_or_else(|| current.saturating_mul(2))
            .max(current + 1)
            .min(limit);
        self.buf.resize(target, 0);
        true
    }
}
