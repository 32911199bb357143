use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use crate::app::DefaultApplication;
use crate::config::Configuration;
use crate::crypto::Keypair;
use crate::hashgraph::inmem_store::InmemStore;
use crate::network::tcp::TcpTransport;
use crate::node::Node;
use crate::peers::PeersConfig;

#[derive(Debug, Clone, Parser)]
pub struct RunNodeCmd {
    #[clap(short, long, default_value = ".hearsay/node.toml")]
    pub config_file: String,
    #[clap(short, long, default_value = "peers.toml")]
    pub peers_file: String,
}

impl RunNodeCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let conf = match Configuration::try_load(PathBuf::from(self.config_file.as_str())) {
            Ok(conf) => conf,
            Err(err) => anyhow::bail!("Error loading configuration file: {err:?}"),
        };

        crate::logging::init_logging(&conf.node.log_level);

        let keypair = Arc::new(Keypair::from_private_key_hex(&conf.node.private_key)?);
        let peers = PeersConfig::try_load(PathBuf::from(self.peers_file.as_str()))?;

        let store = InmemStore::new(peers.clone(), conf.gossip.cache_size);
        let (transport, inbound) = TcpTransport::bind(
            &conf.gossip.bind_addr,
            Duration::from_millis(conf.gossip.rpc_timeout_ms),
        )
        .await?;

        let (mut node, handle) = Node::new(
            Duration::from_millis(conf.gossip.heartbeat_ms),
            conf.gossip.sync_limit,
            keypair,
            peers,
            Box::new(store),
            Arc::new(transport),
            inbound,
            Arc::new(DefaultApplication::new()),
        )?;
        node.init().await?;

        let node_handle = tokio::spawn(node.run(true));

        let shutdown = async {
            let mut stream_int = signal(SignalKind::interrupt())?;
            let mut stream_term = signal(SignalKind::terminate())?;
            tokio::select! {
                _ = stream_int.recv() => handle.shutdown(),
                _ = stream_term.recv() => handle.shutdown(),
            }
            Ok::<(), anyhow::Error>(())
        };

        shutdown.await?;
        node_handle.await?;
        Ok(())
    }
}
