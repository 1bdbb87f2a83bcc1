//! `grant_scout.toml` loading with environment overrides.

use std::path::{Path, PathBuf};

use grant_scout_scoring::ScoringCriteria;
use serde::Deserialize;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "grant_scout.toml";

/// Overrides the database path.
pub const DB_ENV: &str = "GRANT_SCOUT_DB";

/// Overrides the target ZIP.
pub const TARGET_ZIP_ENV: &str = "GRANT_SCOUT_TARGET_ZIP";

/// Errors loading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// Run configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `DuckDB` file; `data/grant_scout.duckdb` under the project root
    /// when unset.
    pub database: Option<PathBuf>,
    /// ZIP code that candidate foundations are measured against.
    pub target_zip: Option<String>,
    /// Skip foundations whose rows disagree on their home ZIP.
    pub strict_home_zip: bool,
    /// Composite score weights and thresholds.
    pub scoring: ScoringCriteria,
}

impl Config {
    /// Loads the config and applies environment overrides.
    ///
    /// An explicit `path` must exist. Without one, a missing
    /// [`DEFAULT_CONFIG_FILE`] yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    log::debug!("No {DEFAULT_CONFIG_FILE} found; using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Applies `GRANT_SCOUT_*` overrides. Blank values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(db) = lookup(DB_ENV) {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(zip) = lookup(TARGET_ZIP_ENV) {
            self.target_zip = Some(zip.trim().to_string());
        }
    }
}
