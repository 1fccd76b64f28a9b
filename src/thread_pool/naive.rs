use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::error;

use super::ThreadPool;
use crate::Result;

/// a simple thread-pool that is not actually a pool. It starts a new thread on every spawn
/// request, so the number of jobs running at once is unbounded.
#[derive(Debug, Default)]
pub struct NaiveThreadPool {
    // counts spawned jobs, used for naming their threads
    spawned: AtomicU64,
}

impl ThreadPool for NaiveThreadPool {
    /// the `threads` argument is ignored
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool::default())
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = thread::Builder::new()
            .name(format!("nframe-job-{}", id))
            .spawn(job)
        {
            error!("Failed to spawn a thread: {}", e);
        }
    }
}
