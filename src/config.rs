use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::CancerType;
use crate::error::SynomixError;

pub const CONFIG_FILE: &str = "synomix.json";
pub const API_URL_ENV: &str = "SYNOMIX_API_URL";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_cancer_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_url: String,
    pub timeout: Duration,
    pub default_cancer_type: Option<CancerType>,
    pub source: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_cancer_type: None,
            source: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    // `SYNOMIX_API_URL` wins over any file value.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SynomixError> {
        let source = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let config = match &source {
            Some(path) => Self::read(path)?,
            None => Config::default(),
        };

        let api_url_override = std::env::var(API_URL_ENV).ok();
        let mut resolved = Self::resolve_config(config, api_url_override.as_deref())?;
        resolved.source = source;
        debug!(api_url = %resolved.api_url, source = ?resolved.source, "configuration resolved");
        Ok(resolved)
    }

    pub fn resolve_config(
        config: Config,
        api_url_override: Option<&str>,
    ) -> Result<ResolvedConfig, SynomixError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let api_url = api_url_override
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or(config.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(SynomixError::ConfigParse(format!(
                "api_url must be an http(s) URL, got {api_url}"
            )));
        }

        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(SynomixError::ConfigParse(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let default_cancer_type = config
            .default_cancer_type
            .map(|value| value.parse::<CancerType>())
            .transpose()?;

        Ok(ResolvedConfig {
            schema_version,
            api_url,
            timeout: Duration::from_secs(timeout_secs),
            default_cancer_type,
            source: None,
        })
    }

    fn read(path: &Path) -> Result<Config, SynomixError> {
        let content =
            fs::read_to_string(path).map_err(|_| SynomixError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| SynomixError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("synomix").join(CONFIG_FILE))
            .filter(|path| path.exists())
    }
}
