// Process configuration, read from the environment once at startup.
//
// Values come from real environment variables first, then from a `.env` file
// in the working directory, then from `<config dir>/podbean-autoupload/.env`.

use crate::api::EpisodeStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.podbean.com/v1";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Everything the watcher and the upload pipeline need to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Folder watched for new episodes.
    pub watch_dir: PathBuf,
    /// Folder published files are moved into.
    pub archive_dir: PathBuf,
    /// `;`-separated sheet with one episode per row.
    pub csv_path: PathBuf,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub episode_status: EpisodeStatus,
    /// Wait between a finished transfer and the publish call.
    pub settle_delay: Duration,
    pub environment: String,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let episode_status = match lookup("PODBEAN_CREATE_DRAFT") {
            None => EpisodeStatus::Publish,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" => EpisodeStatus::Publish,
                "1" | "true" | "yes" => EpisodeStatus::Draft,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "PODBEAN_CREATE_DRAFT",
                        value,
                    })
                }
            },
        };

        let settle_delay = match lookup("SETTLE_DELAY_SECS") {
            None => DEFAULT_SETTLE_DELAY,
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    var: "SETTLE_DELAY_SECS",
                    value,
                })?,
        };

        Ok(Config {
            watch_dir: PathBuf::from(required("PODCAST_LOCATION")?),
            archive_dir: PathBuf::from(required("PODCAST_LOCATION_FINISHED")?),
            csv_path: PathBuf::from(required("CSV_LOCATION")?),
            api_base: lookup("PODBEAN_API")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.into()),
            client_id: required("PODBEAN_USER")?,
            client_secret: required("PODBEAN_PASS")?,
            episode_status,
            settle_delay,
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".into()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Load a `.env` file into the process environment, if one can be found.
/// Returns the path that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    if let Ok(path) = dotenvy::dotenv() {
        return Some(path);
    }
    let fallback = dirs::config_dir()?.join("podbean-autoupload").join(".env");
    dotenvy::from_path(&fallback).ok().map(|_| fallback)
}
