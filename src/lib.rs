//! Multisig Coordinator: proposal coordination for m-of-n wallets
//!
//! This crate coordinates spends from threshold wallets:
//! - Cosigner identities with authentication and extended signing keys
//! - Spend proposals that close once the quorum approves or rejects
//! - Per-input signature computation and assembly for legacy, witness and
//!   nested witness multisig outputs
//! - A coin lock index so that no coin backs two open proposals
//! - Ledger event handling that closes double-spent proposals
//! - Ordered key-value persistence with atomic batches
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use multisig_coordinator::config::CoordinatorConfig;
//! use multisig_coordinator::coordinator::ProposalCoordinator;
//! use multisig_coordinator::ledger::MemoryLedger;
//! use multisig_coordinator::storage::MemoryStore;
//!
//! let ledger = Arc::new(MemoryLedger::new(wallet.clone()));
//! let coordinator = ProposalCoordinator::new(
//!     wallet,
//!     ledger,
//!     Arc::new(MemoryStore::new()),
//!     CoordinatorConfig::default(),
//! )?;
//!
//! let proposal = coordinator.create_proposal(&options, 0, creation_proof).await?;
//! coordinator.approve_proposal(proposal.id, 0, signatures).await?;
//! ```

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod crypto;
pub mod ledger;
pub mod multisig;
pub mod signing;
pub mod storage;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorError, ErrorKind, ProposalCoordinator, ProposalEvent};
pub use core::{OutPoint, Transaction};
pub use crypto::{KeyPair, MessageSignature};
pub use ledger::{LedgerPort, MemoryLedger};
pub use multisig::{Cosigner, MultisigWallet, Proposal, ProposalOptions, ProposalStatus};
pub use storage::{FileStore, MemoryStore, Store};
