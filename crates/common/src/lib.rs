//! Shared types, config, and error definitions for forecast-sync.

pub mod config;
pub mod error;
pub mod fetch;
pub mod resource;
pub mod types;

pub use config::{AppConfig, CacheSettings};
pub use error::Error;
pub use fetch::ForecastFetcher;
pub use resource::Resource;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
