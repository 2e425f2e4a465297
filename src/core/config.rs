use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Deserializer};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_path: PathBuf,

    // Write txn batching for loads and purges
    pub max_puts_before_commit: usize,
    pub max_purge_deletes_before_commit: usize,

    // Purge / access tracking
    #[serde(deserialize_with = "duration_from_secs")]
    pub purge_age: Duration,
    #[serde(deserialize_with = "duration_from_secs")]
    pub access_time_granularity: Duration,

    pub buffer_pool_max_per_size: usize,
    pub max_store_size: u64,                    // informational, redb grows on demand
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./refdata"),
            max_puts_before_commit: 200_000,
            max_purge_deletes_before_commit: 200_000,
            purge_age: Duration::from_secs(30 * 24 * 60 * 60),      // 30 days
            access_time_granularity: Duration::from_secs(60 * 60),  // 1 hour
            buffer_pool_max_per_size: 50,
            max_store_size: 50 * 1024 * 1024 * 1024,                // 50GB
        }
    }
}

impl Config {
    pub fn with_storage_path(path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: path.into(),
            ..Config::default()
        }
    }

    /// Load config from a JSON file, any missing field takes its default.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: Config = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_time_granularity.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "access_time_granularity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}
