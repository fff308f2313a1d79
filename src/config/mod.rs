pub mod memory;

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::shape::{HmacKey, HmacKeyError};
use crate::statistics::SAMPLING_RATE_ALWAYS;

pub use memory::{cap_store_size, resolve_store_size, system_memory_bytes, MemorySize};

const ENV_PREFIX: &str = "QUERYSTATS_";
const ENV_CONFIG_PATH: &str = "QUERYSTATS_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid memory size {0}")]
    InvalidMemorySize(String),
    #[error("invalid hmac key: {0}")]
    HmacKey(#[from] HmacKeyError)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryStatsConfig {
    /// Feature flag. Only read at startup, a disabled service can't be enabled later.
    pub enabled: bool,
    /// Store budget, `<n>MB`, `<n>GB` or `<n>%` of system memory.
    pub cache_size: String,
    /// Admitted requests per second. Zero or less disables collection.
    pub sampling_rate: i32,
    /// Defaults to the number of cores.
    pub partitions: Option<usize>,
    /// Hex encoded secret used when snapshots are redacted.
    pub hmac_key: Option<String>
}

impl Default for QueryStatsConfig {
    fn default() -> Self {
        QueryStatsConfig {
            enabled: true,
            cache_size: "1%".to_string(),
            sampling_rate: SAMPLING_RATE_ALWAYS,
            partitions: None,
            hmac_key: None
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() })
}

impl QueryStatsConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Reads the file named by `QUERYSTATS_CONFIG` if set, then applies `QUERYSTATS_<FIELD>`
    /// overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load_from_path(path)?,
            Err(_) => Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(env::vars())
    }

    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>
    {
        for (key, value) in vars {
            if !key.starts_with(ENV_PREFIX) || key == ENV_CONFIG_PATH {
                continue;
            }
            let field = key[ENV_PREFIX.len()..].to_ascii_lowercase();
            let value = value.trim();
            match field.as_str() {
                "enabled" => self.enabled = parse_value(&key, value)?,
                "cache_size" => self.cache_size = value.to_string(),
                "sampling_rate" => self.sampling_rate = parse_value(&key, value)?,
                "partitions" => self.partitions = Some(parse_value(&key, value)?),
                "hmac_key" => self.hmac_key = Some(value.to_string()),
                _ => return Err(ConfigError::UnknownKey(key))
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        MemorySize::parse(&self.cache_size)?;
        if self.partitions == Some(0) {
            return Err(ConfigError::InvalidValue { key: "partitions".to_string(), value: "0".to_string() });
        }
        self.hmac_key()?;
        Ok(())
    }

    pub fn store_size_bytes(&self) -> Result<usize, ConfigError> {
        resolve_store_size(&self.cache_size)
    }

    pub fn partitions_hint(&self) -> usize {
        self.partitions.unwrap_or_else(num_cpus::get)
    }

    pub fn hmac_key(&self) -> Result<Option<HmacKey>, ConfigError> {
        match &self.hmac_key {
            Some(secret) => Ok(Some(HmacKey::from_hex(secret)?)),
            None => Ok(None)
        }
    }
}
