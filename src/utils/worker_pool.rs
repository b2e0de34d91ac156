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

use std::any::Any;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::AppResult;

/// Work loop run by every thread of a [`WorkerPool`].
///
/// Each thread gets its own clone of the handler, so per-thread state
/// (buffers, counters) lives in `run` and shared state behind `Arc`s.
pub trait PoolHandler: Clone + Send + 'static {
    /// Runs until the handler decides to stop, usually on shutdown.
    fn run(self, worker_id: usize);
}

/// represent a running worker thread
#[derive(Debug)]
struct Worker {
    id: usize,
    handle: JoinHandle<()>,
}

/// Fixed set of named OS threads running the same handler.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            workers: Vec::new(),
        }
    }

    /// Spawns `num_workers` more threads named `{name}-worker-{id}`.
    ///
    /// On a spawn failure the threads already started stay in the pool, so
    /// [`join_all`](WorkerPool::join_all) still reaches them once their
    /// handler stops.
    pub fn spawn<H: PoolHandler>(&mut self, num_workers: usize, handler: H) -> AppResult<()> {
        self.workers.reserve(num_workers);
        for _ in 0..num_workers {
            let id = self.workers.len();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, id))
                .spawn(move || {
                    debug!("Worker {} started", id);
                    handler.run(id);
                    debug!("Worker {} exiting", id);
                })?;
            self.workers.push(Worker { id, handle });
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every thread to finish and returns how many panicked.
    pub fn join_all(self) -> usize {
        let mut panicked = 0;
        for worker in self.workers {
            if let Err(payload) = worker.handle.join() {
                panicked += 1;
                error!(
                    "{} worker {} panicked with message: {}",
                    self.name,
                    worker.id,
                    panic_message(payload.as_ref())
                );
            }
        }
        debug!("{} worker pool joined", self.name);
        panicked
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Counting {
        runs: Arc<AtomicUsize>,
        ids: Arc<parking_lot::Mutex<Vec<(usize, Option<String>)>>>,
    }

    impl PoolHandler for Counting {
        fn run(self, worker_id: usize) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let name = thread::current().name().map(str::to_string);
            self.ids.lock().push((worker_id, name));
        }
    }

    #[test]
    fn test_every_worker_runs_once() {
        let handler = Counting {
            runs: Arc::new(AtomicUsize::new(0)),
            ids: Arc::new(parking_lot::Mutex::new(Vec::new())),
        };
        let mut pool = WorkerPool::new("test");
        pool.spawn(2, handler.clone()).unwrap();
        pool.spawn(1, handler.clone()).unwrap();
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.join_all(), 0);

        assert_eq!(handler.runs.load(Ordering::SeqCst), 3);
        let mut ids = handler.ids.lock().clone();
        ids.sort();
        assert_eq!(
            ids,
            (0..3)
                .map(|id| (id, Some(format!("test-worker-{}", id))))
                .collect::<Vec<_>>()
        );
    }

    #[derive(Clone)]
    struct Panicking;

    impl PoolHandler for Panicking {
        fn run(self, worker_id: usize) {
            if worker_id == 1 {
                panic!("worker {} gave up", worker_id);
            }
        }
    }

    #[test]
    fn test_join_counts_panics() {
        let mut pool = WorkerPool::new("panicky");
        pool.spawn(2, Panicking).unwrap();
        assert_eq!(pool.join_all(), 1);
    }

    #[test]
    fn test_panic_message_downcast() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic payload>");
    }
}
