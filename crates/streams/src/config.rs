//! Runtime configuration
//!
//! Re-exports the configuration crate so users need a single dependency.

pub use wks_config::{ConfigError, KafkaConfig, OffsetReset, RuntimeConfig, StreamsConfig};
