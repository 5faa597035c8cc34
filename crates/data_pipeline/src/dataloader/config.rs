//! src/dataloader/config.rs
//!
//! Configuration for DataLoader behaviour.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .num_workers(4)
//!     .queue_depth(2)
//!     .use_multiprocess(true)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_workers`: more workers improve throughput but raise memory use
//! - `queue_depth`: deeper lookahead reduces accelerator starvation; at
//!   most `queue_depth + 1` batches are ever in flight

/// Configuration for the [`DataLoader`](super::DataLoader).
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of pool workers (0 = single-threaded inline iteration).
    pub num_workers: usize,
    /// Worker execution model. `false` selects shared-memory workers
    /// with one common context; `true` selects isolated workers that
    /// each own a private context and are recycled after
    /// `max_tasks_per_worker` tickets (the process-pool model).
    pub use_multiprocess: bool,
    /// Lookahead buffer size: tickets kept in flight ahead of the
    /// consumer, bounding memory to `queue_depth + 1` batches.
    pub queue_depth: usize,
    /// Tickets an isolated worker completes before its context is
    /// retired and rebuilt. Guards against unbounded per-worker
    /// memory growth on long runs. Defaults to `4 * queue_depth`.
    pub max_tasks_per_worker: usize,
    /// Trainer rank, folded into the per-batch seed so multi-rank
    /// runs draw distinct but reproducible seeds.
    pub rank: u64,
    /// Silently restart the sampler when the stream is exhausted
    /// (consumed by the multi-device coalescer).
    pub auto_reset: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            use_multiprocess: false,
            queue_depth: 2,
            max_tasks_per_worker: 8,
            rank: 0,
            auto_reset: true,
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }
}

/// Builder for [`LoaderConfig`] with method chaining.
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
    max_tasks_set: bool,
}

impl LoaderConfigBuilder {
    /// Set the number of pool workers.
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Select the isolated (recycled-context) worker model.
    pub fn use_multiprocess(mut self, multiprocess: bool) -> Self {
        self.config.use_multiprocess = multiprocess;
        self
    }

    /// Set the lookahead buffer size (must be > 0 when using workers).
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Override the isolated-worker recycling threshold.
    pub fn max_tasks_per_worker(mut self, max_tasks: usize) -> Self {
        self.config.max_tasks_per_worker = max_tasks;
        self.max_tasks_set = true;
        self
    }

    /// Set the trainer rank used in batch-seed derivation.
    pub fn rank(mut self, rank: u64) -> Self {
        self.config.rank = rank;
        self
    }

    /// Control sampler auto-restart on exhaustion.
    pub fn auto_reset(mut self, auto_reset: bool) -> Self {
        self.config.auto_reset = auto_reset;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> LoaderConfig {
        let mut config = self.config;
        if !self.max_tasks_set {
            config.max_tasks_per_worker = (4 * config.queue_depth).max(1);
        }
        config
    }
}
