use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::integrity::HashCheck;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read patch config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse patch config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional per-mod settings shipped next to a mod as TOML.
///
/// ```toml
/// expected_source_md5 = "0e63d4223b01d9aba596259dc155a174"
/// verify_hash = true
/// output_name = "melee-mod.iso"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchConfig {
    pub expected_source_md5: Option<String>,
    pub expected_output_md5: Option<String>,
    /// Hash checks only run when this is set (or forced on the command line).
    pub verify_hash: bool,
    /// File name of the patched image, placed next to the source image.
    pub output_name: Option<String>,
}

impl PatchConfig {
    /// # Errors
    /// `ConfigError` when the file is unreadable or not a valid config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Options of one patch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    pub skip_hash: bool,
    pub overwrite: bool,
    pub expected_source_md5: Option<String>,
    pub expected_output_md5: Option<String>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            skip_hash: true,
            overwrite: false,
            expected_source_md5: None,
            expected_output_md5: None,
        }
    }
}

impl PatchOptions {
    /// Options taken from a config file; command line flags are applied on
    /// top by the caller.
    #[must_use]
    pub fn from_config(config: &PatchConfig) -> Self {
        Self {
            skip_hash: !config.verify_hash,
            expected_source_md5: config.expected_source_md5.clone(),
            expected_output_md5: config.expected_output_md5.clone(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn hash_check(&self) -> HashCheck {
        HashCheck {
            skip: self.skip_hash,
            expected_source_md5: self.expected_source_md5.clone(),
            expected_output_md5: self.expected_output_md5.clone(),
        }
    }
}
