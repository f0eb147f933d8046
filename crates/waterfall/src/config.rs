//! Service configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Size of each chunk read from an archive or a process/socket pipe.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Tunables shared by every streaming operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Maximum payload carried by one outbound chunk
    pub chunk_size: usize,
    /// Working directory for commands that do not set one
    pub default_dir: PathBuf,
    /// Depth of the outbound message queue of one RPC
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_dir: PathBuf::from("/"),
            channel_capacity: 32,
        }
    }
}

impl ServiceConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(std::io::Error::from)
    }

    /// Chunk size clamped to at least one byte.
    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
