use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:4000";
pub const DEFAULT_SERVICE_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_HEARTBEAT_MS: u64 = 50;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SYNC_LIMIT: usize = 1000;
pub const DEFAULT_CACHE_SIZE: usize = 50_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("ParsingFailed: {0}")]
    ParsingFailed(#[from] config::ConfigError),
    #[error("TomlError: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    ///Hex encoded ed25519 private key
    pub private_key: String,
    ///Harness concern: where the node keeps its files
    pub data_dir: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    ///Address the gossip rpc listener binds to
    pub bind_addr: String,
    ///Harness concern: address of the external service endpoint
    pub service_addr: String,
    ///Baseline heartbeat; stretches to a second when there is nothing to say
    pub heartbeat_ms: u64,
    ///Per-rpc deadline
    pub rpc_timeout_ms: u64,
    ///Events a peer may lag before being told to fast-forward
    pub sync_limit: usize,
    ///Bound of the in-memory event, round and block caches
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub node: NodeConfig,
    pub gossip: GossipConfig,
}

impl Configuration {
    pub fn new(private_key: String, data_dir: String) -> Self {
        Self {
            node: NodeConfig {
                private_key,
                data_dir,
                log_level: DEFAULT_LOG_LEVEL.to_string(),
            },
            gossip: GossipConfig {
                bind_addr: DEFAULT_BIND_ADDRESS.to_string(),
                service_addr: DEFAULT_SERVICE_ADDRESS.to_string(),
                heartbeat_ms: DEFAULT_HEARTBEAT_MS,
                rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
                sync_limit: DEFAULT_SYNC_LIMIT,
                cache_size: DEFAULT_CACHE_SIZE,
            },
        }
    }

    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.into()))
            .build()?;
        config.try_deserialize().map_err(|err| err.into())
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<(), ConfigurationError> {
        let config = toml::to_string(&self)?;
        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_write_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("hearsay-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("node.toml");

        let configuration = Configuration::new("aa".repeat(32), "/tmp/hearsay".to_string());
        configuration.try_write(&path).unwrap();

        let loaded = Configuration::try_load(&path).unwrap();
        assert_eq!(loaded.node.private_key, configuration.node.private_key);
        assert_eq!(loaded.gossip.bind_addr, DEFAULT_BIND_ADDRESS);
        assert_eq!(loaded.gossip.sync_limit, DEFAULT_SYNC_LIMIT);

        std::fs::remove_dir_all(&dir).ok();
    }
}
