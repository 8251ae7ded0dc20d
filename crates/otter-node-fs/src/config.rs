//! Configuration for the fs facade (from `node_fs.toml`).

use crate::memory::DEFAULT_CHUNK_SIZE;
use crate::mode::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::stream::DEFAULT_HIGH_WATER_MARK;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Defaults applied when callers leave an option out.
///
/// ```toml
/// default_file_mode = 0o644
/// high_water_mark = 16384
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfig {
    /// Mode for `open`/`chmod`/streams when none (or zero) is given.
    #[serde(default = "default_file_mode")]
    pub default_file_mode: u32,

    /// Mode for `mkdir` when none (or zero) is given.
    #[serde(default = "default_dir_mode")]
    pub default_dir_mode: u32,

    /// Read stream buffering threshold in bytes.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Whether read streams release their handle after end or error.
    #[serde(default = "default_auto_close")]
    pub auto_close: bool,

    /// Chunk size for [`MemoryEngine`](crate::MemoryEngine) handles.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_file_mode() -> u32 {
    DEFAULT_FILE_MODE
}

fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_auto_close() -> bool {
    true
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl FsConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from a TOML file, or return defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let default_path = Path::new("node_fs.toml");
        let config_path = path.unwrap_or(default_path);

        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(contents) => match Self::from_toml_str(&contents) {
                    Ok(cfg) => return cfg,
                    Err(e) => {
                        warn!(path = %config_path.display(), error = %e, "failed to parse fs config");
                    }
                },
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "failed to read fs config");
                }
            }
        }

        Self::default()
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            default_file_mode: default_file_mode(),
            default_dir_mode: default_dir_mode(),
            high_water_mark: default_high_water_mark(),
            auto_close: default_auto_close(),
            chunk_size: default_chunk_size(),
        }
    }
}
