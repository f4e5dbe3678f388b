use crate::error::{ReconError, Result};

/// Fixed-size worker pool shared by every pipeline stage.
///
/// Stages run one after another; each one calls [`Workers::install`] and
/// fans out over an axis whose partitions it writes exclusively.
pub struct Workers {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl Workers {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(ReconError::InvalidConfig(
                "thread budget must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("recon-worker-{}", i))
            .build()?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `op` inside the pool; parallel iterators inside use its threads.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers").field("threads", &self.threads).finish()
    }
}
