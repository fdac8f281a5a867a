use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::codec::Codecs;
use crate::error::ExpdbError;
use crate::store::{ObjectStoreBackend, StorageManager};

pub const DEFAULT_CONFIG: &str = "expdb.json";
pub const DEFAULT_DATABASE: &str = "expdb.sqlite";
pub const DEFAULT_STORAGE_ROOT: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Debug mode: timecourses may be recorded from a dirty source tree.
    #[default]
    Development,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ExpdbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ExpdbError::ConfigParse(format!(
                "unknown environment: {value}"
            ))),
        }
    }
}

/// Contents of `expdb.json`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub database: Option<String>,
    /// Remote bucket such as `gs://expdb`; a bare name gets `gs://`.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub use_global_cache: bool,
    /// Replaces `gcloud storage cp` for bucket transport.
    #[serde(default)]
    pub copy_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local {
        root: Utf8PathBuf,
    },
    ObjectStore {
        bucket: String,
        cache_dir: Option<Utf8PathBuf>,
        copy_command: Option<Vec<String>>,
    },
}

impl BackendConfig {
    pub fn build(&self, codecs: Codecs) -> Result<StorageManager, ExpdbError> {
        match self {
            BackendConfig::Local { root } => Ok(StorageManager::local(root.clone(), codecs)),
            BackendConfig::ObjectStore {
                bucket,
                cache_dir,
                copy_command,
            } => {
                let mut backend = ObjectStoreBackend::new(bucket)?;
                if let Some(command) = copy_command {
                    backend = backend.with_copy_command(command.clone())?;
                }
                Ok(StorageManager::new(
                    Box::new(backend),
                    cache_dir.clone(),
                    codecs,
                ))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub environment: Environment,
    pub debug: bool,
    pub database: Utf8PathBuf,
    pub backend: BackendConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `expdb.json` when present, and applies `EXPDB_*`
    /// environment overrides.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ExpdbError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ExpdbError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| ExpdbError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, |key| std::env::var(key).ok())
    }

    pub fn resolve_config(
        config: Config,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ExpdbError> {
        let environment = match env("EXPDB_ENV") {
            Some(value) => value.parse()?,
            None => config.environment.unwrap_or_default(),
        };
        let database = env("EXPDB_DATABASE")
            .or(config.database)
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let backend = match env("EXPDB_BUCKET").or(config.bucket) {
            Some(bucket) => {
                let cache_dir = match env("EXPDB_CACHE_DIR").or(config.cache_dir) {
                    Some(dir) => Some(Utf8PathBuf::from(dir)),
                    None if config.use_global_cache => Some(global_cache_dir()?),
                    None => None,
                };
                BackendConfig::ObjectStore {
                    bucket: normalize_bucket(&bucket),
                    cache_dir,
                    copy_command: config.copy_command,
                }
            }
            None => BackendConfig::Local {
                root: Utf8PathBuf::from(
                    env("EXPDB_STORAGE_ROOT")
                        .or(config.storage_root)
                        .unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string()),
                ),
            },
        };

        Ok(ResolvedConfig {
            environment,
            debug: environment == Environment::Development,
            database: Utf8PathBuf::from(database),
            backend,
        })
    }
}

/// `expdb` becomes `gs://expdb`; values with a scheme are kept.
pub fn normalize_bucket(bucket: &str) -> String {
    if bucket.contains("://") {
        bucket.to_string()
    } else {
        format!("gs://{bucket}")
    }
}

pub fn global_cache_dir() -> Result<Utf8PathBuf, ExpdbError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("expdb")).ok())
        .ok_or_else(|| ExpdbError::Filesystem("unable to resolve cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_development() {
        let resolved = ConfigLoader::resolve_config(Config::default(), |_| None).unwrap();
        assert_eq!(resolved.environment, Environment::Development);
        assert!(resolved.debug);
        assert_eq!(resolved.database, DEFAULT_DATABASE);
        assert_eq!(
            resolved.backend,
            BackendConfig::Local {
                root: Utf8PathBuf::from(DEFAULT_STORAGE_ROOT)
            }
        );
    }
}
