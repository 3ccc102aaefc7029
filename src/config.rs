use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    pub library: Library,
    pub database: Database,
    pub http: HttpConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "failed to parse config TOML")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub in_memory: bool,
    pub path: Option<PathBuf>,
}

/// The media library: one root directory plus the filtering policy
/// applied to everything found under it.
#[derive(Debug, Deserialize, Clone)]
pub struct Library {
    pub root: PathBuf,
    /// Hide files whose fingerprint is already in the watched store.
    #[serde(default = "default_true")]
    pub skip_watched: bool,
    /// Include the modification time in fingerprints. Leaving it out makes
    /// fingerprints survive touch-only changes but collide more easily.
    #[serde(default = "default_true")]
    pub fingerprint_mtime: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_true() -> bool {
    true
}
