//! Shared thread pool running node computations, continuations and timers.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::ExecutorError;

/// Thread pool used by futures and the execution engine.
///
/// Node logic and continuations are blocking code, so they run on the pool's
/// blocking threads; timers (`cancel_after`, `peek_every`) run on its async
/// workers. Nodes requested from inside another node's logic run on the
/// requesting thread, so a bounded pool cannot starve nested requests.
/// Callers must not assume which thread runs a continuation.
///
/// This is cheap to clone; every clone drives the same pool.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    runtime: Option<Runtime>,
    handle: Handle,
    name: String,
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        // The last handle may be dropped from one of the pool's own threads,
        // where a blocking shutdown would wait on itself.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

static SHARED: OnceLock<Executor> = OnceLock::new();

impl Executor {
    /// Start a pool with the given configuration.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        config.build()
    }

    /// The process-wide default pool, started on first use.
    pub fn shared() -> Executor {
        SHARED
            .get_or_init(|| {
                ExecutorConfig::default()
                    .build()
                    .expect("default executor configuration must start")
            })
            .clone()
    }

    /// Create a builder for a custom pool.
    pub fn builder() -> ExecutorConfig {
        ExecutorConfig::default()
    }

    /// Name used as the prefix of the pool's threads.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run blocking work on the pool.
    pub fn execute<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.inner.handle.spawn_blocking(work));
    }

    /// Run blocking work once `delay` has elapsed.
    pub fn execute_after<F>(&self, delay: Duration, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.inner.handle.clone();
        drop(self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            drop(handle.spawn_blocking(work));
        }));
    }

    /// Run `tick` every `interval` (first run after one interval) until it returns `false`.
    pub fn execute_every<F>(&self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        drop(self.inner.handle.spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                timer.tick().await;
                // Ticks are short callbacks; keep them on the timer task.
                if !tokio::task::block_in_place(&mut tick) {
                    break;
                }
            }
        }));
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("name", &self.inner.name).finish()
    }
}

/// Builder for [`Executor`].
///
/// # Example
///
/// ```
/// use compute_flow::ExecutorConfig;
///
/// let executor = ExecutorConfig::default()
///     .worker_threads(2)
///     .max_blocking_threads(16)
///     .thread_name("analysis")
///     .build()
///     .unwrap();
/// assert_eq!(executor.name(), "analysis");
/// ```
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    worker_threads: usize,
    max_blocking_threads: usize,
    thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            worker_threads: cpus.min(4),
            max_blocking_threads: 512,
            thread_name: "compute-flow".to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Number of async worker threads driving timers.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    /// Upper bound on threads running node logic and continuations.
    ///
    /// Nodes block while waiting on shared in-flight children, so keep this
    /// above the expected depth of concurrently computed trees.
    pub fn max_blocking_threads(mut self, n: usize) -> Self {
        self.max_blocking_threads = n;
        self
    }

    /// Prefix for thread names.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Start the pool.
    pub fn build(self) -> Result<Executor, ExecutorError> {
        if self.worker_threads == 0 || self.max_blocking_threads == 0 {
            return Err(ExecutorError::NoWorkers);
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .max_blocking_threads(self.max_blocking_threads)
            .thread_name(self.thread_name.clone())
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Executor {
            inner: Arc::new(ExecutorInner {
                runtime: Some(runtime),
                handle,
                name: self.thread_name,
            }),
        })
    }
}
