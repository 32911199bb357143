use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::network::{
    expect_eager_sync, expect_fast_forward, expect_sync, EagerSyncRequest, EagerSyncResponse,
    FastForwardRequest, FastForwardResponse, Result, RpcEnvelope, RpcReceiver, RpcRequest,
    RpcResponse, SyncRequest, SyncResponse, Transport, TransportError,
};
use crate::utilities;

/// TCP transport: one length-delimited request/response exchange per
/// connection, payloads in the canonical codec.
pub(crate) struct TcpTransport {
    local_addr: String,
    rpc_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpTransport {
    pub(crate) async fn bind(
        bind_addr: &str,
        rpc_timeout: Duration,
    ) -> anyhow::Result<(Self, RpcReceiver)> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?.to_string();
        let (inbound_tx, inbound_rx) = mpsc::channel(128);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote)) => {
                                log::trace!("Inbound rpc connection from {remote}");
                                let inbound_tx = inbound_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = serve_connection(stream, inbound_tx).await {
                                        log::debug!("Rpc connection error: {err}");
                                    }
                                });
                            }
                            Err(err) => {
                                log::warn!("Accept failed: {err}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log::debug!("Rpc listener shutting down");
                        return;
                    }
                }
            }
        });

        Ok((
            Self {
                local_addr,
                rpc_timeout,
                shutdown_tx,
            },
            inbound_rx,
        ))
    }

    async fn request(&self, target: &str, request: RpcRequest) -> Result<RpcResponse> {
        let exchange = async {
            let stream = TcpStream::connect(target)
                .await
                .map_err(|err| TransportError::Connection(err.to_string()))?;
            let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

            let bytes =
                utilities::encode(&request).map_err(|err| TransportError::Codec(err.to_string()))?;
            framed
                .send(Bytes::from(bytes))
                .await
                .map_err(|err| TransportError::Connection(err.to_string()))?;

            let frame = framed
                .next()
                .await
                .ok_or(TransportError::Closed)?
                .map_err(|err| TransportError::Connection(err.to_string()))?;
            utilities::decode(&frame).map_err(|err| TransportError::Codec(err.to_string()))
        };

        tokio::time::timeout(self.rpc_timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

async fn serve_connection(
    stream: TcpStream,
    inbound_tx: mpsc::Sender<RpcEnvelope>,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let Some(frame) = framed.next().await else {
        return Ok(());
    };
    let request: RpcRequest = utilities::decode(&frame?)?;

    let (respond, response_rx) = oneshot::channel();
    inbound_tx
        .send(RpcEnvelope { request, respond })
        .await
        .map_err(|_| anyhow::anyhow!("rpc consumer gone"))?;

    let response = response_rx
        .await
        .unwrap_or_else(|_| RpcResponse::Error("handler dropped".to_string()));
    framed.send(Bytes::from(utilities::encode(&response)?)).await?;
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }

    async fn sync(&self, target: &str, request: SyncRequest) -> Result<SyncResponse> {
        expect_sync(self.request(target, RpcRequest::Sync(request)).await?)
    }

    async fn eager_sync(
        &self,
        target: &str,
        request: EagerSyncRequest,
    ) -> Result<EagerSyncResponse> {
        expect_eager_sync(self.request(target, RpcRequest::EagerSync(request)).await?)
    }

    async fn fast_forward(
        &self,
        target: &str,
        request: FastForwardRequest,
    ) -> Result<FastForwardResponse> {
        expect_fast_forward(
            self.request(target, RpcRequest::FastForward(request))
                .await?,
        )
    }

    async fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
