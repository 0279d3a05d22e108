//! Shared types, error model, and configuration for Larder.
//!
//! This crate is the foundation depended on by all other Larder crates.
//! It provides:
//! - [`LarderError`]: the unified error type
//! - Domain types ([`CatalogRecord`], [`RecordDraft`], [`Category`], [`Ingredient`])
//! - Configuration ([`AppConfig`], [`EnrichmentConfig`], [`PacingConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EndpointDescriptor, EnrichmentConfig, EnrichmentSection, ImportConfig,
    ImportSection, PacingConfig, PacingSection, StorageSection, config_dir, config_file_path,
    init_config, load_config, load_config_from, parse_delimiter, resolve_db_path,
};
pub use error::{LarderError, Result};
pub use types::{
    CatalogRecord, Category, DEFAULT_CATEGORY, Ingredient, RecordDraft, RecordSummary,
    UNIT_AS_NEEDED, is_stale_error, name_key,
};
