//! Shared types, error model, configuration, and the catalog seam for stixfeed.
//!
//! This crate is the foundation depended on by all other stixfeed crates.
//! It provides:
//! - [`StixFeedError`], the unified error type
//! - Domain types ([`RawObject`], [`ObjectKind`], [`IndicatorEntity`], [`ReportEntity`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`EnrichOptions`], config loading)
//! - [`CollectionSource`], the interface the fetch coordinator pulls from

pub mod config;
pub mod error;
pub mod source;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CatalogConfig, CatalogSection, EnrichOptions, EnrichmentSection, FeedSection,
    FetchConfig, FetchSection, MitreIdPolicy, PartitionPolicy, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{Result, StixFeedError};
pub use source::{BundleSource, CollectionSource};
pub use types::{
    AnnotationType, ExternalReference, FeedEntity, FeedRelatedIndicator, IndicatorEntity,
    IndicatorFields, IndicatorType, NO_DESCRIPTION, ObjectKind, ObjectsByKind, REPORT_ENTITY_TYPE,
    RawObject, ReportEntity, ReportFields, ReportRaw,
};
