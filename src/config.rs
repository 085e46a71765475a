use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::aggregator::AggregateOptions;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Snapshot lifetime in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// How often the background task checks for staleness, in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub feeds: Vec<FeedSource>,
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_check_interval() -> u64 {
    60
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

/// One RSS endpoint of the static registry.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub key: String,
    pub name: String,
    pub url: String,
    pub category: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request network timeout in seconds
    pub request_timeout: u64,
    /// Overall budget for one source (request plus parsing) in seconds
    pub source_timeout: u64,
    pub max_entries: usize,
    pub max_concurrent: usize,
    /// Maximum description length in characters
    pub summary_length: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: 10,
            source_timeout: 15,
            max_entries: 20,
            max_concurrent: 5,
            summary_length: 300,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            max_concurrent: self.max_concurrent,
            source_timeout: Duration::from_secs(self.source_timeout),
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

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval == 0 {
            anyhow::bail!("refresh_interval must be positive");
        }
        if self.check_interval == 0 {
            anyhow::bail!("check_interval must be positive");
        }
        if self.fetch.max_concurrent == 0 {
            anyhow::bail!("fetch.max_concurrent must be positive");
        }

        let mut keys = HashSet::new();
        for feed in &self.feeds {
            if feed.key.trim().is_empty() {
                anyhow::bail!("feed '{}' has an empty key", feed.name);
            }
            if !keys.insert(feed.key.as_str()) {
                anyhow::bail!("duplicate feed key '{}'", feed.key);
            }
        }
        Ok(())
    }
}
