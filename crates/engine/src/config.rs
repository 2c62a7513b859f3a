//! Database configuration
//!
//! A [`DatabaseConfig`] is passed explicitly to [`Database::open`]; there is
//! no global backend registry. It can be built in code through
//! [`DatabaseBuilder`] or read from TOML:
//!
//! ```toml
//! path = "/var/lib/tessera"
//! inline_string_limit = 64
//!
//! [durability]
//! mode = "batched"
//! batch_size = 500
//! ```

use crate::database::Database;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};
use tessera_storage::DurabilityMode;

/// Default longest string kept inline in an index node
pub const DEFAULT_INLINE_STRING_LIMIT: usize = 32;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Store directory; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// When file-backed writes reach the disk
    pub durability: DurabilityMode,
    /// Strings up to this many bytes are stored inside index nodes
    pub inline_string_limit: usize,
    /// Drop loaded nodes of committed trees after each commit
    pub release_node_cache: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            durability: DurabilityMode::default(),
            inline_string_limit: DEFAULT_INLINE_STRING_LIMIT,
            release_node_cache: true,
        }
    }
}

impl DatabaseConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Whether the database lives only in memory
    pub fn is_ephemeral(&self) -> bool {
        self.path.is_none()
    }
}

/// Builder for [`Database`]
///
/// ```ignore
/// let db = Database::builder()
///     .path("./data")
///     .strict()
///     .open()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DatabaseBuilder {
    config: DatabaseConfig,
}

impl DatabaseBuilder {
    /// Start from the defaults (in memory, batched durability)
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the database in `path`
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.config.durability = mode;
        self
    }

    /// fsync every object append
    pub fn strict(self) -> Self {
        self.durability(DurabilityMode::Strict)
    }

    /// Never fsync
    pub fn no_durability(self) -> Self {
        self.durability(DurabilityMode::None)
    }

    /// fsync every `batch_size` appends and before every commit
    pub fn batched(self, batch_size: usize) -> Self {
        self.durability(DurabilityMode::Batched { batch_size })
    }

    /// Longest string kept inline in index nodes
    pub fn inline_string_limit(mut self, limit: usize) -> Self {
        self.config.inline_string_limit = limit;
        self
    }

    /// Whether committed trees drop their loaded nodes
    pub fn release_node_cache(mut self, release: bool) -> Self {
        self.config.release_node_cache = release;
        self
    }

    /// The configuration built so far
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Open the database
    pub fn open(self) -> Result<Database> {
        Database::open(self.config)
    }
}
