//! ruddr-core: configuration and error types shared by every ruddr crate.

pub mod config;
pub mod error;

pub use config::{Config, IngesterConfig, RepresentationConfig, ServerConfig};
pub use error::{Error, Result};
