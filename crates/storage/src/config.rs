//! Store configuration via `_folio.toml`
//!
//! On first open, a default `_folio.toml` is written into the store root.
//! The leading underscore makes it a hidden id, so it is never enumerated
//! as a record. Fan-out and codec are fixed for the lifetime of a store
//! directory; changing them on a populated store orphans existing files.

use folio_core::{codec_by_name, Codec, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the store root.
pub const CONFIG_FILE_NAME: &str = "_folio.toml";

/// Store configuration loaded from `_folio.toml`.
///
/// # Example
///
/// ```toml
/// fanout = 2
/// codec = "json"
/// file_mode = 0o644
/// sync_writes = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of leading id characters turned into nested directories.
    #[serde(default)]
    pub fanout: usize,
    /// Record codec: `"json"` or `"msgpack"`.
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Unix permission bits applied to written record files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    /// fsync each record before it is renamed into place.
    #[serde(default)]
    pub sync_writes: bool,
}

fn default_codec() -> String {
    "json".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fanout: 0,
            codec: default_codec(),
            file_mode: None,
            sync_writes: false,
        }
    }
}

impl StoreConfig {
    /// Config with `fanout` directory levels and defaults elsewhere
    pub fn with_fanout(fanout: usize) -> Self {
        Self {
            fanout,
            ..Self::default()
        }
    }

    /// Resolve the configured codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not `"json"` or `"msgpack"`.
    pub fn codec(&self) -> Result<Box<dyn Codec>> {
        codec_by_name(&self.codec).ok_or_else(|| {
            Error::Config(format!(
                "Invalid codec '{}' in {}. Expected \"json\" or \"msgpack\".",
                self.codec, CONFIG_FILE_NAME
            ))
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Folio store configuration
#
# Fan-out: number of leading id characters used as nested directories.
# 0 keeps every record directly in the store root.
fanout = 0

# Record codec: "json" (default) or "msgpack"
codec = "json"

# fsync every record before it is renamed into place (default: false)
sync_writes = false

# Unix permission bits for record files (default: process umask)
# file_mode = 0o644
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        // Validate the codec eagerly
        config.codec()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
