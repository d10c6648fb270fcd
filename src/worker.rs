//! Fixed-size OS-thread parallel-for, generalized from the fixed 3-thread
//! `std::thread::spawn` + `join` harness
//! `ahnlich_similarity::kdtree::tests::test_simple_insert_multithread` uses
//! for its concurrent-insert test into a reusable pool driven by an atomic
//! work counter, scoped so the body can borrow shared state by reference
//! instead of requiring `Arc<...>` + `'static`.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::Error;

/// Runs `body(index, thread_id)` once for every `index` in `0..len`,
/// spread across `thread_count` OS threads. The body never runs twice for
/// the same index. If any invocation returns `Err`, later invocations
/// still run to completion (cancellation is not supported) but the first
/// error observed is returned to the caller after join.
pub struct WorkerPool {
    thread_count: usize,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn parallel_for<F>(&self, len: usize, body: F) -> Result<(), Error>
    where
        F: Fn(usize, usize) -> Result<(), Error> + Sync,
    {
        if len == 0 {
            return Ok(());
        }
        let counter = AtomicUsize::new(0);
        let error_slot: Mutex<Option<Error>> = Mutex::new(None);
        let threads = self.thread_count.min(len);

        std::thread::scope(|scope| {
            for thread_id in 0..threads {
                let counter = &counter;
                let error_slot = &error_slot;
                let body = &body;
                scope.spawn(move || {
                    loop {
                        if error_slot.lock().is_some() {
                            return;
                        }
                        let index = counter.fetch_add(1, Ordering::Relaxed);
                        if index >= len {
                            return;
                        }
                        if let Err(e) = body(index, thread_id) {
                            let mut slot = error_slot.lock();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            return;
                        }
                    }
                });
            }
        });

        match error_slot.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
