use std::path::PathBuf;

use clap::Parser;

use crate::crypto::Keypair;
use crate::peers::{Peer, PeersConfig};

/// Scaffolds a peers file for a local cluster, generating a keypair per
/// node and printing the private keys for the matching node configs.
#[derive(Debug, Clone, Parser)]
pub struct InitPeersCmd {
    #[clap(long, default_value = "peers.toml")]
    pub output: String,
    #[clap(long, default_value_t = 3)]
    pub count: u16,
    #[clap(long, default_value = "127.0.0.1")]
    pub ip: String,
    #[clap(long, default_value_t = 4000)]
    pub base_port: u16,
}

impl InitPeersCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        let mut peers = vec![];
        for i in 0..self.count {
            let keypair = Keypair::generate(None);
            let name = format!("node{i}");
            let address = format!("{}:{}", self.ip, self.base_port + i);
            println!("{name}: address {address}");
            println!("  private key: {}", keypair.private_key_hex());
            peers.push(Peer::new(name, address, keypair.public_key().to_hex()));
        }

        let path = PathBuf::from(&self.output);
        PeersConfig::new(peers).try_write(&path)?;
        println!("Wrote peers file to {path:?}");
        Ok(())
    }
}
