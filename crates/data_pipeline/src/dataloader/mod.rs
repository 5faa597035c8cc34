//! src/dataloader/mod.rs
//!
//! Batch loading with optional concurrent prefetching.
//!
//! # Architecture
//!
//! ```text
//! DataLoader::iter()
//!     |
//!     |-- num_workers == 0 --> SingleIter (inline fetch + collate)
//!     |
//!     `-- num_workers > 0 ---> PooledIter
//!             |
//!             |  dispatch tickets (seq, indices, seed), round-robin
//!             v
//!         WorkerPool ----> workers: fetch_sample* -> collate
//!             |                       |
//!             |                       v  (seq, Result<FeedBatch>)
//!             |               completion channel (bounded)
//!             |                       |
//!             |                       v
//!             |               collector thread -> ReorderBuffer
//!             |                                       |
//!             `-- next_batch() waits on seq order ----'
//! ```
//!
//! The consumer always observes batches in sampler order, whatever
//! order the workers finish in.

mod config;
mod loader;

pub(crate) mod iterator;
pub(crate) mod workers;

pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use iterator::LoaderIter;
pub use loader::DataLoader;
