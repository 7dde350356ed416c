//! System configuration shared by the CLI and the parameter core.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Canonical system configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    pub home: PathBuf,
    /// Durable stash storage (shared by every node)
    pub stash_root: PathBuf,
    /// Parent of every execution node root
    pub nodes_root: PathBuf,
    /// Persisted build records
    pub builds_dir: PathBuf,
    /// Spool directory for uploads waiting for the stash handoff
    pub upload_temp_root: PathBuf,
    pub logs_dir: PathBuf,
}

/// Optional overrides read from `<home>/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    stash_root: Option<PathBuf>,
    nodes_root: Option<PathBuf>,
    builds_dir: Option<PathBuf>,
    upload_temp_root: Option<PathBuf>,
}

impl SystemConfig {
    /// Defaults rooted at `home`, no config file consulted.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            stash_root: paths::default_stash_root(&home),
            nodes_root: paths::default_nodes_root(&home),
            builds_dir: paths::default_builds_dir(&home),
            upload_temp_root: paths::default_upload_temp_root(&home),
            logs_dir: paths::default_logs_dir(&home),
            home,
        }
    }

    /// Resolve home (see [`paths::filebind_home`]) and apply `config.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(paths::filebind_home())
    }

    pub fn load_from(home: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::with_home(home);
        let path = config.home.join("config.toml");
        if !path.exists() {
            return Ok(config);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let file: ConfigFile =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        let home = config.home.clone();
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { home.join(p) };
        if let Some(p) = file.stash_root {
            config.stash_root = resolve(p);
        }
        if let Some(p) = file.nodes_root {
            config.nodes_root = resolve(p);
        }
        if let Some(p) = file.builds_dir {
            config.builds_dir = resolve(p);
        }
        if let Some(p) = file.upload_temp_root {
            config.upload_temp_root = resolve(p);
        }
        Ok(config)
    }

    /// Root directory of a named execution node.
    pub fn node_root(&self, node: &str) -> PathBuf {
        self.nodes_root.join(node)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
