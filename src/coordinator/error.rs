//! Coordinator errors

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{OutPoint, TransactionError};
use crate::ledger::LedgerError;
use crate::multisig::{ProposalError, ProposalStatus, WalletError};
use crate::signing::SigningError;
use crate::storage::StorageError;

/// Failure classes callers react to differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request, rejected before any lock is taken
    Validation,
    /// Business rule violated; state is untouched
    Conflict,
    /// A cryptographic proof or signature was wrong
    Authentication,
    /// Ledger and coordinator bookkeeping disagree
    Inconsistency,
    /// Storage or ledger failure, propagated unchanged
    External,
    NotFound,
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(u32),
    #[error("Cosigner not found: {0}")]
    CosignerNotFound(u8),
    #[error("Memo must be 1 to {max} bytes, got {len}")]
    InvalidMemo { len: usize, max: usize },
    #[error("Expected {expected} signatures, got {actual}")]
    SignatureCount { expected: usize, actual: usize },
    #[error("Signature(s) incorrect: {valid} of {expected} valid")]
    SignaturesIncorrect { expected: usize, valid: usize },
    #[error("Invalid creation proof from cosigner {0}")]
    InvalidCreationProof(u8),
    #[error("Invalid rejection proof from cosigner {0}")]
    InvalidRejectionProof(u8),
    #[error("Coin {outpoint} is locked by proposal {owner}")]
    CoinLocked { outpoint: OutPoint, owner: u32 },
    #[error("Proposal is not approved (status {0})")]
    NotApproved(ProposalStatus),
    #[error("Too many inputs: {0}")]
    TooManyInputs(usize),
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Input {0} is not a spendable wallet coin")]
    UnknownInput(OutPoint),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
    #[error("Proposal error: {0}")]
    Proposal(#[from] ProposalError),
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        use CoordinatorError::*;

        match self {
            ProposalNotFound(_) => ErrorKind::NotFound,
            CosignerNotFound(_)
            | InvalidMemo { .. }
            | TooManyInputs(_)
            | NoInputs
            | UnknownInput(_)
            | InvalidAmount(_)
            | Config(_) => ErrorKind::Validation,
            Wallet(WalletError::CosignerNotFound(_)) => ErrorKind::Validation,
            Wallet(WalletError::Incomplete { .. }) => ErrorKind::Conflict,
            Wallet(_) => ErrorKind::Validation,
            SignatureCount { .. }
            | SignaturesIncorrect { .. }
            | InvalidCreationProof(_)
            | InvalidRejectionProof(_) => ErrorKind::Authentication,
            CoinLocked { .. } | NotApproved(_) => ErrorKind::Conflict,
            Inconsistent(_) | Transaction(_) => ErrorKind::Inconsistency,
            Proposal(err) => match err {
                ProposalError::NotPending(_)
                | ProposalError::AlreadyApproved(_)
                | ProposalError::AlreadyRejected(_)
                | ProposalError::InvalidForceStatus(_) => ErrorKind::Conflict,
                ProposalError::Decode(_)
                | ProposalError::InvalidStatus(_)
                | ProposalError::Key(_) => ErrorKind::Inconsistency,
                _ => ErrorKind::Validation,
            },
            Signing(err) if err.is_inconsistency() => ErrorKind::Inconsistency,
            Signing(SigningError::Verification { .. }) => ErrorKind::Authentication,
            Signing(_) => ErrorKind::Validation,
            Ledger(LedgerError::InsufficientFunds { .. }) => ErrorKind::Conflict,
            Ledger(LedgerError::NoOutputs) | Ledger(LedgerError::AmountOverflow(_)) => {
                ErrorKind::Validation
            }
            Ledger(LedgerError::Wallet(_)) => ErrorKind::Validation,
            Ledger(_) | Storage(_) => ErrorKind::External,
        }
    }
}
