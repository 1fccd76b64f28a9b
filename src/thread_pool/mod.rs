//! Thread pools the [`NframeServer`](crate::NframeServer) can run its connections on.
//!
//! [`NaiveThreadPool`] starts a new thread for every connection. Connections are never
//! queued or throttled.
use crate::Result;

/// A pool of threads that run jobs
pub trait ThreadPool {
    /// creates a new pool with the given number of `threads`
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// runs `job` on one of the pool's threads
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod naive;

pub use self::naive::NaiveThreadPool;
