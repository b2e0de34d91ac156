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

use rand::Rng;

/// Shortest delay a [`Backoff`] hands out.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Doubling delay capped at `max`, optionally jittered down to half.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    /// Both bounds are raised to at least [`MIN_DELAY`].
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_DELAY);
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            jitter: false,
        }
    }

    /// Spreads each delay uniformly over `[delay / 2, delay]`.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        if self.jitter {
            rand::thread_rng().gen_range(delay / 2..=delay)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
