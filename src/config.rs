use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,

    /// Name this instance reports as `requestingModule` in outbound sync
    /// requests.
    #[serde(default = "defaults::module_name")]
    pub module_name: String,

    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,

    /// Delivery attempts before a message is dead-lettered.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Retry delays in seconds, indexed by attempt number. Attempts past the
    /// end of the table reuse the last entry.
    #[serde(default = "defaults::backoff_delays")]
    pub backoff_delays: Vec<u64>,

    /// Upper bound on how long the processor sleeps between passes when no
    /// store change notification arrives.
    #[serde(default = "defaults::fallback_poll_secs")]
    pub fallback_poll_secs: u64,

    /// Comma separated `module=base-url` pairs used to address owning
    /// modules, e.g. `billing=http://billing:8080,crm=http://crm:8080`.
    pub modules: Option<String>,
}

mod defaults {
    pub fn module_name() -> String {
        "relaymq".to_owned()
    }

    pub fn listen_addr() -> String {
        "127.0.0.1:8080".to_owned()
    }

    pub fn max_attempts() -> u32 {
        5
    }

    pub fn backoff_delays() -> Vec<u64> {
        vec![5, 30, 120, 600]
    }

    pub fn fallback_poll_secs() -> u64 {
        30
    }
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        let config = envy::prefixed("RELAYMQ_").from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.backoff_delays.is_empty() {
            eyre::bail!("backoff_delays must contain at least one entry");
        }
        if self.max_attempts == 0 {
            eyre::bail!("max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Delay before retrying the given (1-based) failed attempt. The index
    /// clamps to the last table entry.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_delays.len() - 1);
        Duration::from_secs(self.backoff_delays[idx])
    }

    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_poll_secs)
    }

    pub fn module_endpoints(&self) -> eyre::Result<HashMap<String, Url>> {
        let mut endpoints = HashMap::new();

        let Some(raw) = &self.modules else {
            return Ok(endpoints);
        };

        for pair in raw.split(',').filter(|s| !s.trim().is_empty()) {
            let (name, url) = pair
                .split_once('=')
                .ok_or_else(|| eyre::eyre!("invalid module mapping: {pair}"))?;
            endpoints.insert(name.trim().to_owned(), Url::parse(url.trim())?);
        }

        Ok(endpoints)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            module_name: defaults::module_name(),
            listen_addr: defaults::listen_addr(),
            max_attempts: defaults::max_attempts(),
            backoff_delays: defaults::backoff_delays(),
            fallback_poll_secs: defaults::fallback_poll_secs(),
            modules: None,
        }
    }
}
