//! Runtime configuration types shared across crates.
//!
//! Loading and validating the TOML file is the server crate's job; this
//! module only holds the validated values the processing pipeline reads.

mod config_store;
mod processor;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use processor::{DEFAULT_FALLBACK_RATE, DEFAULT_MAX_ATTEMPTS, ProcessorConfig};
