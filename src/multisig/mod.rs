//! Multi-signature wallets and spend proposals
//!
//! Provides M-of-N threshold wallets where M approvals from N cosigners
//! are required to spend funds, and the proposal state machine that
//! collects those approvals.
//!
//! # Example
//!
//! ```ignore
//! use multisig_coordinator::multisig::{MultisigWallet, Proposal, ScriptKind};
//!
//! // Create a 2-of-3 wallet and let the cosigners join
//! let mut wallet = MultisigWallet::new("vault", 2, 3, ScriptKind::Witness)?;
//! wallet.add_cosigner(alice)?;
//!
//! // A proposal closes once two cosigners approve (or two reject)
//! let mut proposal = Proposal::new(0, alice_id, &options, proof, wallet.m, wallet.n)?;
//! proposal.approve(0, signatures)?;
//! ```

pub mod cosigner;
pub mod proposal;
pub mod wallet;

pub use cosigner::{is_valid_name, Cosigner, MAX_NAME_LENGTH};
pub use proposal::{
    PayloadType, Proposal, ProposalError, ProposalOptions, ProposalStatus, SignatureSet,
    MAX_INPUT_SIGNATURE_SIZE, MAX_MEMO_LENGTH, MAX_PROPOSAL_INPUTS,
};
pub use wallet::{MultisigWallet, ScriptKind, WalletError};
