use std::path::PathBuf;

use clap::Parser;

use crate::config::{Configuration, DEFAULT_BIND_ADDRESS, DEFAULT_SERVICE_ADDRESS};
use crate::crypto::Keypair;

#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    ///Directory the configuration and data files live in
    #[clap(long, default_value = ".hearsay")]
    pub data_dir: String,
    #[clap(long, default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_addr: String,
    #[clap(long, default_value = DEFAULT_SERVICE_ADDRESS)]
    pub service_addr: String,
    #[clap(long)]
    pub heartbeat_ms: Option<u64>,
    #[clap(long)]
    pub sync_limit: Option<usize>,
}

impl InitCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        let dir = PathBuf::from(&self.data_dir);
        let path = dir.join("node.toml");
        if path.exists() {
            anyhow::bail!("Configuration file already exists: {path:?}");
        }
        std::fs::create_dir_all(&dir)?;

        let keypair = Keypair::generate(None);
        let mut configuration = Configuration::new(keypair.private_key_hex(), self.data_dir);
        configuration.gossip.bind_addr = self.bind_addr;
        configuration.gossip.service_addr = self.service_addr;
        if let Some(heartbeat_ms) = self.heartbeat_ms {
            configuration.gossip.heartbeat_ms = heartbeat_ms;
        }
        if let Some(sync_limit) = self.sync_limit {
            configuration.gossip.sync_limit = sync_limit;
        }

        configuration.try_write(&path)?;
        println!("Wrote configuration to {path:?}");
        println!("public key: {}", keypair.public_key().to_hex());
        Ok(())
    }
}
