use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::places::PlaceSource;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DATA_DIR: &str = "public";

/// Settings as written in `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub sources: Vec<PlaceSource>,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

/// Where place lists are read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Http { base_url: String },
    Files { data_dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub transport: Transport,
    pub db_path: PathBuf,
    pub timeout: Duration,
    /// Place lists in priority order, primary first.
    pub sources: Vec<PlaceSource>,
}

impl Config {
    /// Resolve settings from overrides, then the config file, then defaults.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match &overrides.config_path {
            Some(path) => read_file(path)?,
            None => match default_config_path().filter(|path| path.exists()) {
                Some(path) => read_file(&path)?,
                None => FileConfig::default(),
            },
        };
        Self::resolve(overrides, file)
    }

    pub fn resolve(overrides: &Overrides, file: FileConfig) -> Result<Self, ConfigError> {
        let transport = match overrides.base_url.clone().or(file.base_url) {
            Some(base_url) if !base_url.trim().is_empty() => Transport::Http { base_url },
            _ => Transport::Files {
                data_dir: overrides
                    .data_dir
                    .clone()
                    .or(file.data_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            },
        };
        let db_path = overrides
            .db_path
            .clone()
            .or(file.db_path)
            .unwrap_or_else(default_db_path);
        let timeout_secs = file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        let sources = if file.sources.is_empty() {
            default_sources()
        } else {
            file.sources
        };
        if let Some(source) = sources
            .iter()
            .find(|s| s.label.trim().is_empty() || s.location.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "source {source:?} needs both a label and a location"
            )));
        }
        Ok(Config {
            transport,
            db_path,
            timeout: Duration::from_secs(timeout_secs),
            sources,
        })
    }
}

pub fn default_sources() -> Vec<PlaceSource> {
    vec![
        PlaceSource::new("暴食清單", "gluttony.json"),
        PlaceSource::new("應援清單", "support.json"),
        PlaceSource::new("島國清單", "island.json"),
    ]
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gluttony").join("config.toml"))
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gluttony.db3")
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    debug!(path = %path.display(), "reading config file");
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}
