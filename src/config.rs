//! Container configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! metadata_start = 2048
//! metadata_capacity = 256
//! recreate_invalid = false
//!
//! [compression]
//! method = "lz4"
//! threshold = 1024
//! min_ratio = 1.0
//! ```

use crate::catalog::RECORD_SIZE;
use crate::compression::CompressionConfig;
use crate::error::{ContainerError, Result};
use crate::header::{Header, DEFAULT_METADATA_CAPACITY, DEFAULT_METADATA_START, MIN_METADATA_START};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Offset of the metadata table in new containers
    pub metadata_start: u32,

    /// Metadata slots reserved in new containers
    pub metadata_capacity: u32,

    /// Discard and recreate a file that is not a valid container on open
    pub recreate_invalid: bool,

    pub compression: CompressionConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            metadata_start: DEFAULT_METADATA_START,
            metadata_capacity: DEFAULT_METADATA_CAPACITY,
            recreate_invalid: false,
            compression: CompressionConfig::default(),
        }
    }
}

impl ContainerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ContainerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading container config from {:?}", path.as_ref());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_start < MIN_METADATA_START {
            return Err(ContainerError::InvalidConfig(format!(
                "metadata_start must be at least {}, got {}",
                MIN_METADATA_START, self.metadata_start
            )));
        }

        if self.metadata_capacity == 0 {
            return Err(ContainerError::InvalidConfig(
                "metadata_capacity must be at least 1".to_string(),
            ));
        }

        let region = u64::from(self.metadata_capacity) * RECORD_SIZE as u64;
        if u64::from(self.metadata_start) + region > u64::from(u32::MAX) {
            return Err(ContainerError::InvalidConfig(format!(
                "metadata region of {} slots at {} exceeds the 4 GiB offset space",
                self.metadata_capacity, self.metadata_start
            )));
        }

        self.compression.validate()
    }

    /// Header for a new container laid out by this configuration
    pub fn header(&self) -> Header {
        Header::new(self.metadata_start, self.metadata_capacity)
    }
}
