//! Proposal coordination
//!
//! Ties the proposal state machine to persistent storage, the coin lock
//! index and the ledger, and publishes every state change as an event.

pub mod cache;
pub mod db;
pub mod error;
pub mod events;
pub mod locks;
pub mod manager;

#[cfg(test)]
mod scenarios;

pub use cache::CoordinatorCache;
pub use db::ProposalDb;
pub use error::{CoordinatorError, ErrorKind};
pub use events::{EventBus, ProposalEvent};
pub use locks::{KeyedGuard, KeyedMutex};
pub use manager::{ProposalCoordinator, ProposalInput};
