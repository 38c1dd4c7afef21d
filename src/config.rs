use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::AggregationLevel;
use crate::error::CacheError;

pub const DEFAULT_CONFIG_FILE: &str = "rdbc.json";
pub const DEFAULT_CACHE_DIR: &str = ".resultdb-cache";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache_root: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub columns: Option<ColumnOverrides>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ColumnOverrides {
    #[serde(default)]
    pub experiment: Option<String>,
    #[serde(default)]
    pub decoy: Option<String>,
    #[serde(default)]
    pub q_value: Option<String>,
    #[serde(default)]
    pub global_q_value: Option<String>,
    #[serde(default)]
    pub rollup_global_q_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityColumns {
    pub experiment: String,
    pub decoy: String,
    pub q_value: String,
    pub global_q_value: String,
    pub rollup_global_q_value: Option<String>,
}

impl QualityColumns {
    pub fn global_q_value_for(&self, level: AggregationLevel) -> &str {
        match (&self.rollup_global_q_value, level.is_sample_rollup()) {
            (Some(column), true) => column,
            _ => &self.global_q_value,
        }
    }
}

impl Default for QualityColumns {
    fn default() -> Self {
        Self {
            experiment: "experiment_uuid".to_string(),
            decoy: "is_decoy".to_string(),
            q_value: "q_value".to_string(),
            global_q_value: "global_q_value".to_string(),
            rollup_global_q_value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub cache_root: Utf8PathBuf,
    pub debug: bool,
    pub columns: QualityColumns,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CacheError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CacheError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CacheError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CacheError> {
        let cache_root = match config.cache_root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_cache_root()?,
        };

        let defaults = QualityColumns::default();
        let columns = match config.columns {
            Some(overrides) => QualityColumns {
                experiment: overrides.experiment.unwrap_or(defaults.experiment),
                decoy: overrides.decoy.unwrap_or(defaults.decoy),
                q_value: overrides.q_value.unwrap_or(defaults.q_value),
                global_q_value: overrides.global_q_value.unwrap_or(defaults.global_q_value),
                rollup_global_q_value: overrides.rollup_global_q_value,
            },
            None => defaults,
        };

        Ok(ResolvedConfig {
            cache_root,
            debug: config.debug.unwrap_or(false),
            columns,
        })
    }
}

pub fn default_cache_root() -> Result<Utf8PathBuf, CacheError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(DEFAULT_CACHE_DIR)).ok())
        .ok_or_else(|| CacheError::Filesystem("unable to resolve cache directory".to_string()))
}
