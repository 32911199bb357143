use clap::Parser;

mod crypto;
pub mod init;
pub mod peers;
pub mod run_node;

#[derive(Parser, Debug, Clone)]
#[command(about = "Leaderless BFT ordering over a gossiped DAG of signed events")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Subcommand {
    ///Create a node configuration file with a fresh keypair
    Init(init::InitCmd),
    ///Create a peers file for a local cluster
    Peers(peers::InitPeersCmd),
    ///Run a node against an existing configuration
    RunNode(run_node::RunNodeCmd),
    ///Print a fresh keypair
    GenerateKeypair(crypto::GenerateKeypairCmd),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Init(init) => {
                init.execute()?;
            }
            Subcommand::Peers(peers) => {
                peers.execute()?;
            }
            Subcommand::RunNode(run_node) => run_node.execute().await?,
            Subcommand::GenerateKeypair(generate) => {
                generate.execute();
            }
        }
        Ok(())
    }
}
