//! Configuration module for the execution service
//!
//! Supports an optional YAML file overlaid with environment variables. The
//! resulting `JailConfig` is built once at process start and shared
//! read-only between requests.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::JailError;
use std::path::Path;

/// Load a configuration from an optional YAML file and the environment
pub async fn load_config(path: Option<&Path>) -> Result<JailConfig, JailError> {
    ConfigLoader::load(path).await
}
