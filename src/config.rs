use serde::Deserialize;
use std::path::Path;

use crate::rank::MAX_ENTRIES;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Sent as the `User-Agent` header on every feed request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Overall request timeout in seconds, body included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum concurrent connections to any one host
    #[serde(default = "default_conns_per_host")]
    pub conns_per_host: usize,
    /// Maximum number of entries on the rendered page
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_user_agent() -> String {
    "eris (https://github.com/admacleod/eris)".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_conns_per_host() -> usize {
    20
}

fn default_max_entries() -> usize {
    MAX_ENTRIES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            conns_per_host: default_conns_per_host(),
            max_entries: default_max_entries(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }
        if self.conns_per_host == 0 {
            anyhow::bail!("conns_per_host must be positive");
        }
        if self.max_entries == 0 {
            anyhow::bail!("max_entries must be positive");
        }
        Ok(())
    }
}
