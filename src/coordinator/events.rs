//! Outbound proposal events
//!
//! The coordinator publishes every state change on a broadcast channel.
//! Transports (HTTP push, websockets, logs) subscribe independently.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::{OutPoint, Transaction};
use crate::multisig::Proposal;

/// Events emitted after the corresponding write has committed
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ProposalEvent {
    /// A proposal was created and its coins locked
    Created { wallet: String, proposal: Proposal },
    /// A cosigner approved; the proposal is still pending
    Approval {
        wallet: String,
        proposal: Proposal,
        cosigner: u8,
    },
    /// The quorum approved and the signed transaction verified
    Approved {
        wallet: String,
        proposal: Proposal,
        cosigner: u8,
        tx: Transaction,
    },
    /// A cosigner rejected; the proposal is still pending
    Rejection {
        wallet: String,
        proposal: Proposal,
        cosigner: u8,
    },
    /// The proposal closed without a spend (rejected, double spend or
    /// failed verification)
    Rejected {
        wallet: String,
        proposal: Proposal,
        cosigner: Option<u8>,
    },
    /// Coins held by a proposal were released
    CoinsUnlocked {
        wallet: String,
        proposal_id: u32,
        coins: Vec<OutPoint>,
    },
}

impl ProposalEvent {
    pub fn wallet(&self) -> &str {
        match self {
            ProposalEvent::Created { wallet, .. }
            | ProposalEvent::Approval { wallet, .. }
            | ProposalEvent::Approved { wallet, .. }
            | ProposalEvent::Rejection { wallet, .. }
            | ProposalEvent::Rejected { wallet, .. }
            | ProposalEvent::CoinsUnlocked { wallet, .. } => wallet,
        }
    }
}

/// Broadcaster for proposal events
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ProposalEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ProposalEvent) {
        log::debug!("Event for wallet {}: {:?}", event.wallet(), kind(&event));
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProposalEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn kind(event: &ProposalEvent) -> &'static str {
    match event {
        ProposalEvent::Created { .. } => "created",
        ProposalEvent::Approval { .. } => "approval",
        ProposalEvent::Approved { .. } => "approved",
        ProposalEvent::Rejection { .. } => "rejection",
        ProposalEvent::Rejected { .. } => "rejected",
        ProposalEvent::CoinsUnlocked { .. } => "coins unlocked",
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
