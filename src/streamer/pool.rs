/*!
 * Fixed-size worker pool
 *
 * Workers consume workloads from an MPMC channel. The pool owns the shared
 * stop flag that cooperative cancellation threads through every batch; on
 * drop the flag is raised, the channel is closed and the workers are
 * joined. Queued workloads that never ran are dropped - by that point the
 * responder has been stopped, so nobody is waiting on their events.
 */

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::streamer::workload::Workload;

pub struct ThreadPool {
    sender: Option<Sender<Workload>>,
    threads: Vec<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Workload>();
        let stopped = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(size);
        for index in 0..size {
            let receiver: Receiver<Workload> = receiver.clone();
            let stopped = stopped.clone();
            let thread = std::thread::Builder::new()
                .name(format!("quasar-worker-{}", index))
                .spawn(move || {
                    while let Ok(mut workload) = receiver.recv() {
                        if stopped.load(Ordering::Relaxed) {
                            // shutting down; unexecuted workloads are dropped
                            break;
                        }
                        let result =
                            catch_unwind(AssertUnwindSafe(|| workload.execute(&stopped)));
                        if result.is_err() {
                            warn!("failed handling workload");
                        }
                    }
                })
                .expect("failed to spawn worker thread");
            threads.push(thread);
        }

        Self {
            sender: Some(sender),
            threads,
            stopped,
        }
    }

    /// Queue one workload for execution.
    pub fn push(&self, workload: Workload) {
        if let Some(sender) = &self.sender {
            // send only fails when every receiver is gone, which cannot
            // happen before drop
            let _ = sender.send(workload);
        }
    }

    /// The stop flag shared with every executing workload.
    pub fn stopped(&self) -> &Arc<AtomicBool> {
        &self.stopped
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        debug!("shutting down worker pool");
        self.stopped.store(true, Ordering::Release);
        // closing the channel wakes idle workers
        self.sender.take();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_spawns_workers() {
        let pool = ThreadPool::new(4);
        assert_eq!(pool.size(), 4);
        assert!(!pool.stopped().load(Ordering::Relaxed));
    }

    #[test]
    fn test_pool_executes_workloads() {
        // empty workloads pass through the pool without effect; this
        // exercises dispatch and clean shutdown
        let pool = ThreadPool::new(2);
        for _ in 0..8 {
            pool.push(Workload::new());
        }
        drop(pool);
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = ThreadPool::new(2);
        let stopped = pool.stopped().clone();
        drop(pool);
        assert!(stopped.load(Ordering::Relaxed));
    }
}
