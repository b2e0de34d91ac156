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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative shutdown signal shared by the controller, the workers and
/// the publisher's retry loop.
///
/// Cloning is cheap; every clone observes the same flag. Nothing is
/// interrupted: holders poll `is_shutdown` at their own loop boundaries.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    is_shutdown: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown::default()
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        !self.is_shutdown.swap(true, Ordering::AcqRel)
    }
}
