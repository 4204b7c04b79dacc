use crate::{
    aggregator::{
        DEFAULT_BATCH_DELAY,
        DEFAULT_BATCH_SIZE,
    },
    clock::DEFAULT_CLOCK_POLL,
    service::DEFAULT_REFRESH_INTERVAL,
};
use deployments::DeploymentEnv;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_TESTNET_RPC_URL: &str = "https://testnet-rpc.monad.xyz";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";
pub const TESTNET_CHAIN_ID: u64 = 10143;
pub const LOCAL_CHAIN_ID: u64 = 31337;
/// Canonical Multicall3 deployment, present on most EVM chains.
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
}

/// Tunables for the read side and for write confirmation.
///
/// Every field is optional in the JSON file; missing fields take the defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub clock_poll_secs: u64,
    pub refresh_secs: u64,
    /// `None` waits for confirmation indefinitely.
    pub confirmation_timeout_secs: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_ms: DEFAULT_BATCH_DELAY.as_millis() as u64,
            clock_poll_secs: DEFAULT_CLOCK_POLL.as_secs(),
            refresh_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            confirmation_timeout_secs: Some(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }
}

impl ClientSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn validate(self) -> Result<Self, SettingsError> {
        if self.batch_size == 0 {
            return Err(SettingsError::ZeroBatchSize);
        }
        Ok(self)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn clock_poll(&self) -> Duration {
        Duration::from_secs(self.clock_poll_secs.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    Testnet { url: String },
    Local { url: String },
}

impl NetworkTarget {
    pub fn testnet(url: Option<String>) -> Self {
        NetworkTarget::Testnet {
            url: url.unwrap_or_else(|| DEFAULT_TESTNET_RPC_URL.to_string()),
        }
    }

    pub fn local(url: Option<String>) -> Self {
        NetworkTarget::Local {
            url: url.unwrap_or_else(|| DEFAULT_LOCAL_RPC_URL.to_string()),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkTarget::Testnet { url } | NetworkTarget::Local { url } => url,
        }
    }

    pub fn deployment_env(&self) -> DeploymentEnv {
        match self {
            NetworkTarget::Testnet { .. } => DeploymentEnv::Testnet,
            NetworkTarget::Local { .. } => DeploymentEnv::Local,
        }
    }

    pub fn default_chain_id(&self) -> u64 {
        match self {
            NetworkTarget::Testnet { .. } => TESTNET_CHAIN_ID,
            NetworkTarget::Local { .. } => LOCAL_CHAIN_ID,
        }
    }
}
