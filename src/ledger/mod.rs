//! Ledger capability
//!
//! The coordinator never tracks balances or selects coins itself. It asks
//! a [`LedgerPort`] to build transactions, describe the coins they spend,
//! derive signing rings and broadcast the result.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CoinView, OutPoint, Transaction};
use crate::multisig::{Cosigner, ProposalOptions, WalletError};
use crate::signing::{KeyPath, KeyRing};

pub use memory::MemoryLedger;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("No outputs requested")]
    NoOutputs,
    #[error("Amount overflow: {0}")]
    AmountOverflow(&'static str),
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Wallet balance in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub coins: usize,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Build an unsigned transaction paying `options.outputs`
    ///
    /// Coins in `exclude` are locked by pending proposals and must not be
    /// selected.
    async fn build_transaction(
        &self,
        options: &ProposalOptions,
        exclude: &HashSet<OutPoint>,
    ) -> Result<Transaction, LedgerError>;

    /// Unspent coins consumed by `tx`; unknown inputs are left out
    async fn coin_view(&self, tx: &Transaction) -> Result<CoinView, LedgerError>;

    /// Wallet key path per input, `None` for inputs the wallet does not own
    async fn input_paths(&self, tx: &Transaction) -> Result<Vec<Option<KeyPath>>, LedgerError>;

    /// Watch-only ring for `cosigner` at `path`
    async fn derive_keyring(
        &self,
        cosigner: &Cosigner,
        path: KeyPath,
    ) -> Result<KeyRing, LedgerError>;

    async fn broadcast(&self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn balance(&self) -> Result<Balance, LedgerError>;
}
