use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::network::{
    expect_eager_sync, expect_fast_forward, expect_sync, EagerSyncRequest, EagerSyncResponse,
    FastForwardRequest, FastForwardResponse, Result, RpcEnvelope, RpcReceiver, RpcRequest,
    RpcResponse, SyncRequest, SyncResponse, Transport, TransportError,
};

/// Routes in-process transports to each other by address. Multiple nodes
/// share one router inside a single test process.
#[derive(Clone, Default)]
pub(crate) struct InmemRouter {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<RpcEnvelope>>>>,
}

impl InmemRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(&self, addr: String, sender: mpsc::Sender<RpcEnvelope>) {
        self.endpoints.lock().unwrap().insert(addr, sender);
    }

    fn unregister(&self, addr: &str) {
        self.endpoints.lock().unwrap().remove(addr);
    }

    fn lookup(&self, addr: &str) -> Option<mpsc::Sender<RpcEnvelope>> {
        self.endpoints.lock().unwrap().get(addr).cloned()
    }
}

/// Channel-backed transport with the same semantics as the TCP one, for
/// multi-node suites in a single process.
pub(crate) struct InmemTransport {
    local_addr: String,
    rpc_timeout: Duration,
    router: InmemRouter,
}

impl InmemTransport {
    pub(crate) fn new(
        local_addr: String,
        rpc_timeout: Duration,
        router: InmemRouter,
    ) -> (Self, RpcReceiver) {
        let (inbound_tx, inbound_rx) = mpsc::channel(128);
        router.register(local_addr.clone(), inbound_tx);
        (
            Self {
                local_addr,
                rpc_timeout,
                router,
            },
            inbound_rx,
        )
    }

    async fn request(&self, target: &str, request: RpcRequest) -> Result<RpcResponse> {
        let endpoint = self
            .router
            .lookup(target)
            .ok_or_else(|| TransportError::UnknownPeer(target.to_string()))?;

        let (respond, response_rx) = oneshot::channel();
        endpoint
            .send(RpcEnvelope { request, respond })
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::time::timeout(self.rpc_timeout, response_rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for InmemTransport {
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
        self.router.unregister(&self.local_addr);
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::peers::PeerId;

    use super::*;

    #[tokio::test]
    async fn test_routes_by_address() {
        let router = InmemRouter::new();
        let (a, _a_inbound) =
            InmemTransport::new("a".to_string(), Duration::from_secs(1), router.clone());
        let (_b, mut b_inbound) =
            InmemTransport::new("b".to_string(), Duration::from_secs(1), router.clone());

        tokio::spawn(async move {
            while let Some(envelope) = b_inbound.recv().await {
                if let RpcRequest::EagerSync(request) = envelope.request {
                    let _ = envelope.respond.send(RpcResponse::EagerSync(EagerSyncResponse {
                        from_id: PeerId(2),
                        success: request.events.is_empty(),
                    }));
                }
            }
        });

        let response = a
            .eager_sync(
                "b",
                EagerSyncRequest {
                    from_id: PeerId(1),
                    events: vec![],
                },
            )
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let router = InmemRouter::new();
        let (a, _inbound) =
            InmemTransport::new("a".to_string(), Duration::from_secs(1), router);

        let result = a
            .sync(
                "nowhere",
                SyncRequest {
                    from_id: PeerId(1),
                    known: BTreeMap::new(),
                },
            )
            .await;
        assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    }
}
