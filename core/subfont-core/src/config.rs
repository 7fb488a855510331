//! Configuration: a TOML file in the platform config directory, with a couple
//! of environment overrides on top.
//!
//! ```toml
//! [scan]
//! roots = ["/usr/share/fonts", "~/.local/share/fonts"]
//! workers = 4
//! dedup = true
//!
//! [index]
//! paths = ["/var/cache/subfont/system.json"]
//!
//! [server]
//! bind = "127.0.0.1:47215"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::discovery::{ExtensionFilter, PathDiscovery, DEFAULT_EXTENSIONS};
use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::scan::{default_workers, ScanOptions};
use crate::server::DEFAULT_BIND;

/// Overrides `index.paths`. Separated like `PATH`.
pub const ENV_INDEX_PATH: &str = "SUBFONT_INDEX_PATH";
/// Overrides `server.bind`.
pub const ENV_BIND: &str = "SUBFONT_BIND";

const CONFIG_FILE: &str = "subfont.toml";
const DEFAULT_INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub index: IndexConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub workers: usize,
    pub follow_symlinks: bool,
    pub dedup: bool,
    pub precount: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            workers: default_workers(),
            follow_symlinks: false,
            dedup: false,
            precount: true,
        }
    }
}

impl ScanConfig {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            workers: self.workers.max(1),
            precount: self.precount,
            dedup: self.dedup,
        }
    }

    /// Discovery over `roots`, falling back to the configured roots.
    pub fn discovery(&self, roots: &[PathBuf]) -> PathDiscovery {
        let roots = if roots.is_empty() { &self.roots } else { roots };
        PathDiscovery::new(roots.iter().cloned())
            .follow_symlinks(self.follow_symlinks)
            .extensions(ExtensionFilter::new(&self.extensions))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Artifacts merged into the served index, in order.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    /// A missing file means defaults.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_config_path() {
            Ok(path) => Self::load_from(&path)?,
            Err(err) => {
                debug!(error = %err, "no config directory, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        info!(path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config {
            reason: format!("parsing {}: {e}", path.display()),
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: format!("serializing config: {e}"),
        })?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(env::var_os(ENV_INDEX_PATH), env::var(ENV_BIND).ok());
    }

    fn apply_overrides(&mut self, index_paths: Option<std::ffi::OsString>, bind: Option<String>) {
        if let Some(raw) = index_paths {
            let paths: Vec<PathBuf> = env::split_paths(&raw)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                debug!(count = paths.len(), "index paths taken from environment");
                self.index.paths = paths;
            }
        }
        if let Some(bind) = bind.filter(|b| !b.trim().is_empty()) {
            self.server.bind = bind;
        }
    }

    /// Configured index artifacts, or the default one in the data directory.
    pub fn index_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.index.paths.is_empty() {
            return Ok(self.index.paths.clone());
        }
        Ok(vec![Self::default_data_dir()?.join(DEFAULT_INDEX_FILE)])
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
    }

    pub fn default_data_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "subfont").ok_or_else(|| Error::Config {
        reason: "could not determine the user's config directory".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempdir().expect("tempdir");
        let config = Config::load_from(&tmp.path().join("nope.toml")).expect("load");
        assert_eq!(config, Config::default());
        assert!(config.scan.precount);
        assert!(config.scan.workers >= 1);
        assert_eq!(config.server.bind, DEFAULT_BIND);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("subfont.toml");
        fs::write(&path, "[scan]\nworkers = 3\ndedup = true\n").expect("write");

        let config = Config::load_from(&path).expect("load");
        assert_eq!(config.scan.workers, 3);
        assert!(config.scan.dedup);
        assert_eq!(config.scan.extensions.len(), DEFAULT_EXTENSIONS.len());
        assert_eq!(config.server.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn save_then_load() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("nested/subfont.toml");
        let mut config = Config::default();
        config.index.paths = vec!["/tmp/a.json".into()];
        config.save_to(&path).expect("save");

        assert_eq!(Config::load_from(&path).expect("load"), config);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("subfont.toml");
        fs::write(&path, "[scan\nworkers = ").expect("write");

        assert!(matches!(Config::load_from(&path), Err(Error::Config { .. })));
    }

    #[test]
    fn overrides_replace_index_paths_and_bind() {
        let mut config = Config::default();
        let joined = env::join_paths(["/a/one.json", "/b/two.json"]).expect("join");
        config.apply_overrides(Some(joined), Some("0.0.0.0:9000".to_string()));

        assert_eq!(
            config.index.paths,
            vec![PathBuf::from("/a/one.json"), PathBuf::from("/b/two.json")]
        );
        assert_eq!(config.server.bind, "0.0.0.0:9000");

        config.apply_overrides(Some("".into()), Some("  ".to_string()));
        assert_eq!(config.index.paths.len(), 2);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }
}
