//! Bounded worker pools.
//!
//! Each fan-out stage (slice cleanup, uploads, loads, optional table-level
//! extraction) owns a dedicated [`WorkerPool`] so that one stage saturating its
//! threads never starves another. Work items are blocking calls; the pool's
//! threads are the only source of concurrency.

use crate::error::{PipelineError, Result};
use rayon::prelude::*;

/// A fixed-size pool of worker threads backed by a private rayon pool.
pub struct WorkerPool {
    name: String,
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `threads` workers, or one per CPU when `None`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the OS refuses to spawn the threads.
    pub fn new(name: &str, threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| PipelineError::Config(format!("building {name} pool: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` over every item and join, returning results in input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.pool.install(|| items.into_par_iter().map(f).collect())
    }

    /// Like [`WorkerPool::map`], but each worker carries private state built by
    /// `init` (e.g. its own client handle) across the items it processes.
    pub fn map_with_state<T, S, R, I, F>(&self, items: Vec<T>, init: I, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        I: Fn() -> S + Send + Sync,
        F: Fn(&mut S, T) -> R + Send + Sync,
    {
        self.pool
            .install(|| items.into_par_iter().map_init(init, f).collect())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn map_preserves_input_order() {
        let pool = WorkerPool::new("test", Some(4)).unwrap();
        let out = pool.map((0..100).collect(), |x: i32| x * 2);
        assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
        assert_eq!(pool.size(), 4);
    }

    #[test]
    fn map_with_state_builds_at_most_one_state_per_split() {
        let inits = AtomicUsize::new(0);
        let pool = WorkerPool::new("state", Some(2)).unwrap();
        let out = pool.map_with_state(
            vec![1, 2, 3, 4, 5, 6],
            || {
                inits.fetch_add(1, Ordering::SeqCst);
                0u32
            },
            |seen: &mut u32, x: i32| {
                *seen += 1;
                x + 1
            },
        );
        assert_eq!(out, vec![2, 3, 4, 5, 6, 7]);
        let created = inits.load(Ordering::SeqCst);
        assert!((1..=6).contains(&created), "created {created}");
    }

    #[test]
    fn zero_threads_is_clamped_to_one() {
        let pool = WorkerPool::new("tiny", Some(0)).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
