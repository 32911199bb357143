use clap::Parser;

use crate::crypto::Keypair;
use crate::peers::ToPeerId;

#[derive(Debug, Clone, Parser)]
pub struct GenerateKeypairCmd {}

impl GenerateKeypairCmd {
    pub fn execute(self) {
        let keypair = Keypair::generate(None);
        println!("private key: {}", keypair.private_key_hex());
        println!("public key:  {}", keypair.public_key().to_hex());
        println!("peer id:     {}", keypair.peer_id());
    }
}
