//! Runtime configuration.
//!
//! Loaded from an optional TOML file; every field has a default so a
//! missing file or a partial one is fine.

use crate::pattern::{NoteValue, DEFAULT_TEMPO};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Ceilings used to spot a corrupt project blob, plus the purge range
/// used when one is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// More tracks than this means the blob is corrupt.
    pub max_tracks: usize,
    /// Any track id above this means the blob is corrupt.
    pub max_track_id: u32,
    /// Per-track blobs with ids below this are removed on reset.
    pub purge_id_limit: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tracks: 8,
            max_track_id: 10,
            purge_id_limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the stored JSON documents.
    pub storage_dir: PathBuf,
    pub default_bpm: u32,
    /// Piano-roll grid resolution for new projects.
    pub division: NoteValue,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".steproll"),
            default_bpm: DEFAULT_TEMPO,
            division: NoteValue::Quarter,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source).context("Failed to parse TOML configuration")?;
        if config.default_bpm == 0 {
            anyhow::bail!("default_bpm must be positive");
        }
        Ok(config)
    }
}
