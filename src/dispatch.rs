//! Fixed-size worker pool for independent generation and packaging tasks

use crate::config::PoolConfig;
use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::time::{Duration, Instant};

/// Outcome of a completed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub tasks: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

/// Runs a batch of tasks on a private thread pool.
///
/// Arguments are split into static chunks of `chunk_size` consecutive tasks,
/// and each chunk is handed to a single worker. Tasks share nothing but the
/// closure, which must be `Sync`. The first task
/// to fail stops the remaining batch and its error is returned; there is no
/// partial-failure isolation.
pub struct WorkDispatcher {
    config: PoolConfig,
    progress_bar: Option<ProgressBar>,
}

impl WorkDispatcher {
    /// Create a dispatcher for the given pool configuration
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            progress_bar: None,
        }
    }

    /// Enable progress bar
    pub fn with_progress(mut self) -> Self {
        self.progress_bar = Some(ProgressBar::new(0));
        self
    }

    /// Pool configuration in use
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Progress bar, when enabled
    pub fn progress_bar(&self) -> Option<&ProgressBar> {
        self.progress_bar.as_ref()
    }

    /// Size and style the progress bar for `total` steps.
    ///
    /// Returns a handle to advance, or `None` when progress is disabled.
    /// Writers that bypass [`WorkDispatcher::run`] use this to report progress.
    pub fn progress_for(&self, total: usize) -> Option<ProgressBar> {
        let pb = self.progress_bar.as_ref()?;
        pb.set_length(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb.clone())
    }

    /// Finish or abandon the progress bar to match `outcome`
    pub fn finish_progress<R>(&self, outcome: &Result<R>) {
        if let Some(pb) = &self.progress_bar {
            match outcome {
                Ok(_) => pb.finish_with_message("done"),
                Err(_) => pb.abandon_with_message("failed"),
            }
        }
    }

    /// Run `task_fn` once per argument and block until the batch finishes
    pub fn run<T, F>(&self, args: Vec<T>, task_fn: F) -> Result<DispatchReport>
    where
        T: Send,
        F: Fn(T) -> Result<()> + Sync + Send,
    {
        let total = args.len();
        let workers = self.config.pool_size.max(1);
        let chunk_size = self.config.chunk_size.max(1);

        // Dropped on every exit path, which releases the worker threads.
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("imageinary-worker-{idx}"))
            .build()?;

        tracing::debug!(tasks = total, workers, chunk_size, "dispatching batch");

        // Each chunk is one unit of work; its tasks run in order on one worker.
        let progress_bar = self.progress_for(total);
        let start = Instant::now();
        let outcome: Result<()> = pool.install(|| {
            args.into_par_iter()
                .chunks(chunk_size)
                .try_for_each(|chunk| {
                    chunk.into_iter().try_for_each(|arg| -> Result<()> {
                        task_fn(arg)?;
                        if let Some(pb) = &progress_bar {
                            pb.inc(1);
                        }
                        Ok(())
                    })
                })
        });
        let elapsed = start.elapsed();

        self.finish_progress(&outcome);
        outcome?;
        tracing::debug!(tasks = total, elapsed_ms = elapsed.as_millis() as u64, "batch complete");

        Ok(DispatchReport {
            tasks: total,
            workers,
            elapsed,
        })
    }
}
