use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Per-phase transport timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub resolve_ms: u64,
    pub connect_ms: u64,
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            resolve_ms: 2000,
            connect_ms: 5000,
            send_ms: 5000,
            receive_ms: 5000,
        }
    }
}

impl Timeouts {
    pub fn resolve(&self) -> Duration {
        Duration::from_millis(self.resolve_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn send(&self) -> Duration {
        Duration::from_millis(self.send_ms)
    }

    pub fn receive(&self) -> Duration {
        Duration::from_millis(self.receive_ms)
    }
}

/// Client construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent to the transport as the user-agent identifier.
    pub user_agent: String,
    pub timeouts: Timeouts,
    /// Upper bound on open connections per (host, port).
    pub max_connections_per_endpoint: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "relay-http".to_string(),
            timeouts: Timeouts::default(),
            max_connections_per_endpoint: 8,
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `RELAY_USER_AGENT` and `RELAY_MAX_CONNECTIONS`.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(agent) = std::env::var("RELAY_USER_AGENT") {
            cfg.user_agent = agent;
        }

        if let Some(max) = std::env::var("RELAY_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|max| *max > 0)
        {
            cfg.max_connections_per_endpoint = max;
        }

        cfg
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml).context("Invalid client config")?;

        if cfg.max_connections_per_endpoint == 0 {
            anyhow::bail!("max_connections_per_endpoint must be at least 1");
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections_per_endpoint = max;
        self
    }
}
