//! Feed pipeline and domain logic for stixfeed.
//!
//! This crate ties together the collection fetch, the relationship graph,
//! report partitioning and entity enrichment into one run (`run_feed`).

pub mod fetch;
pub mod graph;
pub mod indicators;
pub mod partition;
pub mod pipeline;
pub mod reports;

pub use pipeline::{
    DEFAULT_BATCH_SIZE, EnrichedFeed, FeedRunResult, ProgressReporter, SilentProgress, enrich,
    preview_indicators, run_feed,
};
