use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::hashgraph::event::WireEvent;
use crate::hashgraph::frame::Frame;
use crate::hashgraph::Block;
use crate::peers::PeerId;

pub(crate) mod inmem;
pub(crate) mod tcp;

pub(crate) type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Rpc timeout")]
    Timeout,
    #[error("Connection: {0}")]
    Connection(String),
    #[error("Codec: {0}")]
    Codec(String),
    #[error("Unknown peer address: {0}")]
    UnknownPeer(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Transport closed")]
    Closed,
}

/// Pull: tell the peer what we know, receive what we miss.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct SyncRequest {
    pub(crate) from_id: PeerId,
    pub(crate) known: BTreeMap<PeerId, i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct SyncResponse {
    pub(crate) from_id: PeerId,
    ///The requester is too far behind and should fast-forward instead
    pub(crate) sync_limit: bool,
    pub(crate) events: Vec<WireEvent>,
    pub(crate) known: BTreeMap<PeerId, i64>,
}

/// Push: hand the peer the events it misses.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct EagerSyncRequest {
    pub(crate) from_id: PeerId,
    pub(crate) events: Vec<WireEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct EagerSyncResponse {
    pub(crate) from_id: PeerId,
    pub(crate) success: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct FastForwardRequest {
    pub(crate) from_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct FastForwardResponse {
    pub(crate) from_id: PeerId,
    pub(crate) block: Block,
    pub(crate) frame: Frame,
    pub(crate) snapshot: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) enum RpcRequest {
    Sync(SyncRequest),
    EagerSync(EagerSyncRequest),
    FastForward(FastForwardRequest),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) enum RpcResponse {
    Sync(SyncResponse),
    EagerSync(EagerSyncResponse),
    FastForward(FastForwardResponse),
    Error(String),
}

/// One inbound RPC: the decoded request plus the channel the handler
/// answers on.
#[derive(Debug)]
pub(crate) struct RpcEnvelope {
    pub(crate) request: RpcRequest,
    pub(crate) respond: oneshot::Sender<RpcResponse>,
}

pub(crate) type RpcReceiver = mpsc::Receiver<RpcEnvelope>;

/// Point-to-point RPC duplex between peers. Implementations answer
/// inbound requests through the receiver handed out at construction.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    fn local_addr(&self) -> String;

    async fn sync(&self, target: &str, request: SyncRequest) -> Result<SyncResponse>;

    async fn eager_sync(
        &self,
        target: &str,
        request: EagerSyncRequest,
    ) -> Result<EagerSyncResponse>;

    async fn fast_forward(
        &self,
        target: &str,
        request: FastForwardRequest,
    ) -> Result<FastForwardResponse>;

    async fn close(&self);
}

pub(crate) fn expect_sync(response: RpcResponse) -> Result<SyncResponse> {
    match response {
        RpcResponse::Sync(response) => Ok(response),
        RpcResponse::Error(err) => Err(TransportError::Remote(err)),
        other => Err(TransportError::Codec(format!(
            "unexpected response: {other:?}"
        ))),
    }
}

pub(crate) fn expect_eager_sync(response: RpcResponse) -> Result<EagerSyncResponse> {
    match response {
        RpcResponse::EagerSync(response) => Ok(response),
        RpcResponse::Error(err) => Err(TransportError::Remote(err)),
        other => Err(TransportError::Codec(format!(
            "unexpected response: {other:?}"
        ))),
    }
}

pub(crate) fn expect_fast_forward(response: RpcResponse) -> Result<FastForwardResponse> {
    match response {
        RpcResponse::FastForward(response) => Ok(response),
        RpcResponse::Error(err) => Err(TransportError::Remote(err)),
        other => Err(TransportError::Codec(format!(
            "unexpected response: {other:?}"
        ))),
    }
}
