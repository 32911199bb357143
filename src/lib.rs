pub mod app;
pub mod cli;
pub mod config;
pub(crate) mod core;
pub mod crypto;
pub(crate) mod hashgraph;
pub mod logging;
pub(crate) mod network;
pub mod node;
pub mod peers;
pub(crate) mod utilities;

pub use app::{Application, ApiBlock, CommitResponse, DefaultApplication};
pub use hashgraph::{Block, BlockSignature};
pub use node::{Node, NodeHandle, NodeState};
