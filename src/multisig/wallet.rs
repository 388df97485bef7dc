//! Multi-signature wallet implementation
//!
//! Provides threshold-based wallets requiring M-of-N signatures. Every
//! output is locked to a sorted multisig script over the cosigners' keys
//! derived at the same `(branch, index)`.

use bitcoin::bip32;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cosigner::{is_valid_name, Cosigner};
use crate::core::script::{p2sh, p2wsh, sorted_multisig};
use crate::core::{ScriptBuf, ScriptError, MAX_MULTISIG_KEYS};
use crate::signing::{KeyPath, KeyRing};

/// Errors related to wallet configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Invalid threshold: {m}-of-{n}")]
    InvalidThreshold { m: u8, n: u8 },
    #[error("Invalid name: {0:?}")]
    InvalidName(String),
    #[error("Duplicate cosigner id {0}")]
    DuplicateCosigner(u8),
    #[error("Wallet already has all {0} cosigners")]
    WalletFull(u8),
    #[error("Cosigner not found: {0}")]
    CosignerNotFound(u8),
    #[error("Wallet is not complete: {joined} of {n} cosigners joined")]
    Incomplete { joined: usize, n: u8 },
    #[error("Key derivation error: {0}")]
    Hd(String),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

impl From<bip32::Error> for WalletError {
    fn from(err: bip32::Error) -> Self {
        WalletError::Hd(err.to_string())
    }
}

/// How wallet outputs wrap the multisig script
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// P2SH
    Legacy,
    /// P2WSH
    #[default]
    Witness,
    /// P2SH-P2WSH
    Nested,
}

impl ScriptKind {
    pub fn is_witness(&self) -> bool {
        !matches!(self, ScriptKind::Legacy)
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, ScriptKind::Nested)
    }
}

/// A multi-signature wallet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultisigWallet {
    pub name: String,
    /// Minimum signatures required (M in M-of-N)
    pub m: u8,
    /// Total cosigners (N)
    pub n: u8,
    pub kind: ScriptKind,
    pub cosigners: Vec<Cosigner>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl MultisigWallet {
    /// Create a new multisig wallet with no cosigners
    ///
    /// # Errors
    /// Returns error if the name is invalid or `1 <= m <= n <= 15` fails
    pub fn new(name: &str, m: u8, n: u8, kind: ScriptKind) -> Result<Self, WalletError> {
        if !is_valid_name(name) {
            return Err(WalletError::InvalidName(name.to_string()));
        }
        if m == 0 || m > n || n as usize > MAX_MULTISIG_KEYS {
            return Err(WalletError::InvalidThreshold { m, n });
        }

        Ok(Self {
            name: name.to_string(),
            m,
            n,
            kind,
            cosigners: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Add a cosigner; ids must be unique and at most `n` may join
    pub fn add_cosigner(&mut self, cosigner: Cosigner) -> Result<(), WalletError> {
        if self.cosigners.len() >= self.n as usize {
            return Err(WalletError::WalletFull(self.n));
        }
        if self.cosigners.iter().any(|c| c.id == cosigner.id) {
            return Err(WalletError::DuplicateCosigner(cosigner.id));
        }
        self.cosigners.push(cosigner);
        self.cosigners.sort_by_key(|c| c.id);
        Ok(())
    }

    pub fn cosigner(&self, id: u8) -> Option<&Cosigner> {
        self.cosigners.iter().find(|c| c.id == id)
    }

    pub fn is_complete(&self) -> bool {
        self.cosigners.len() == self.n as usize
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.m, self.n)
    }

    /// Sorted multisig script at `path`
    pub fn multisig_script(&self, path: KeyPath) -> Result<ScriptBuf, WalletError> {
        if !self.is_complete() {
            return Err(WalletError::Incomplete {
                joined: self.cosigners.len(),
                n: self.n,
            });
        }
        let keys = self
            .cosigners
            .iter()
            .map(|c| c.derive_key(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sorted_multisig(self.m as usize, &keys)?)
    }

    /// Ring for `cosigner_id` at `path`, watch-only
    pub fn keyring(&self, cosigner_id: u8, path: KeyPath) -> Result<KeyRing, WalletError> {
        let cosigner = self
            .cosigner(cosigner_id)
            .ok_or(WalletError::CosignerNotFound(cosigner_id))?;
        let script = self.multisig_script(path)?;
        Ok(KeyRing::from_public(cosigner.derive_key(path)?)
            .with_script(script, self.kind.is_witness(), self.kind.is_nested())
            .with_path(path))
    }

    /// Output script of the wallet address at `path`
    pub fn output_script(&self, path: KeyPath) -> Result<ScriptBuf, WalletError> {
        let script = self.multisig_script(path)?;
        Ok(match self.kind {
            ScriptKind::Legacy => p2sh(&script),
            ScriptKind::Witness => p2wsh(&script),
            ScriptKind::Nested => p2sh(&p2wsh(&script)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Xpriv, Xpub};
    use bitcoin::Network;
    use secp256k1::Secp256k1;

    fn cosigner(id: u8) -> Cosigner {
        let master = Xpriv::new_master(Network::Bitcoin, &[id + 1; 32]).unwrap();
        Cosigner::new(
            id,
            &format!("cosigner{}", id),
            KeyPair::generate().public_key,
            Xpub::from_priv(&Secp256k1::new(), &master),
        )
        .unwrap()
    }

    fn wallet(m: u8, n: u8, kind: ScriptKind) -> MultisigWallet {
        let mut wallet = MultisigWallet::new("vault", m, n, kind).unwrap();
        for id in 0..n {
            wallet.add_cosigner(cosigner(id)).unwrap();
        }
        wallet
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = wallet(2, 3, ScriptKind::Witness);
        assert_eq!(wallet.description(), "2-of-3");
        assert!(wallet.is_complete());
        assert_eq!(wallet.cosigner(1).map(|c| c.id), Some(1));
    }

    #[test]
    fn test_threshold_validation() {
        for (m, n) in [(0, 2), (3, 2), (1, 16)] {
            assert_eq!(
                MultisigWallet::new("w", m, n, ScriptKind::Legacy).unwrap_err(),
                WalletError::InvalidThreshold { m, n }
            );
        }
        assert!(MultisigWallet::new("w", 15, 15, ScriptKind::Legacy).is_ok());
        assert!(MultisigWallet::new("bad name", 1, 1, ScriptKind::Legacy).is_err());
    }

    #[test]
    fn test_cosigner_limits() {
        let mut wallet = MultisigWallet::new("w", 1, 2, ScriptKind::Witness).unwrap();
        wallet.add_cosigner(cosigner(0)).unwrap();
        assert_eq!(
            wallet.add_cosigner(cosigner(0)),
            Err(WalletError::DuplicateCosigner(0))
        );
        wallet.add_cosigner(cosigner(1)).unwrap();
        assert_eq!(wallet.add_cosigner(cosigner(2)), Err(WalletError::WalletFull(2)));
    }

    #[test]
    fn test_incomplete_wallet_has_no_script() {
        let mut wallet = MultisigWallet::new("w", 2, 2, ScriptKind::Witness).unwrap();
        wallet.add_cosigner(cosigner(0)).unwrap();
        assert!(matches!(
            wallet.multisig_script(KeyPath::new(0, 0)),
            Err(WalletError::Incomplete { joined: 1, n: 2 })
        ));
    }

    #[test]
    fn test_keyring_matches_output_script() {
        for kind in [ScriptKind::Legacy, ScriptKind::Witness, ScriptKind::Nested] {
            let wallet = wallet(2, 3, kind);
            let path = KeyPath::new(0, 4);
            let ring = wallet.keyring(2, path).unwrap();
            assert_eq!(ring.output_script(), wallet.output_script(path).unwrap());
            assert_eq!(ring.path, Some(path));
        }
    }

    #[test]
    fn test_script_is_order_independent() {
        let a = wallet(2, 3, ScriptKind::Legacy);
        let mut b = MultisigWallet::new("vault", 2, 3, ScriptKind::Legacy).unwrap();
        for id in [2, 0, 1] {
            b.add_cosigner(cosigner(id)).unwrap();
        }
        let path = KeyPath::new(1, 0);
        assert_eq!(a.multisig_script(path).unwrap(), b.multisig_script(path).unwrap());
        assert_ne!(
            a.multisig_script(path).unwrap(),
            a.multisig_script(KeyPath::new(1, 1)).unwrap()
        );
    }
}
