use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    ///Normal operation: answering RPCs and gossiping on the heartbeat
    Babbling,
    ///Too far behind, fetching an anchor block and frame from a peer
    CatchingUp,
    ///Terminal
    Shutdown,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeState::Babbling => "Babbling",
            NodeState::CatchingUp => "CatchingUp",
            NodeState::Shutdown => "Shutdown",
        };
        write!(f, "{name}")
    }
}

/// Shared, lock-free view of the node state. Gossip tasks flip it to
/// CatchingUp; Shutdown wins over everything and is irreversible.
#[derive(Clone, Default)]
pub(crate) struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    pub(crate) fn get(&self) -> NodeState {
        match self.0.load(Ordering::SeqCst) {
            0 => NodeState::Babbling,
            1 => NodeState::CatchingUp,
            _ => NodeState::Shutdown,
        }
    }

    pub(crate) fn set(&self, state: NodeState) {
        if self.get() == NodeState::Shutdown {
            return;
        }
        let value = match state {
            NodeState::Babbling => 0,
            NodeState::CatchingUp => 1,
            NodeState::Shutdown => 2,
        };
        self.0.store(value, Ordering::SeqCst);
    }
}
