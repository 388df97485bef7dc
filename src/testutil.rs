//! Shared test fixtures

use bitcoin::{Amount, Network};
use secp256k1::Secp256k1;

use crate::core::script::p2pkh;
use crate::core::{CoinView, EcdsaSighashType, Transaction, TxOut};
use crate::crypto::{sign_message, KeyPair, MessageSignature, Xpriv, Xpub};
use crate::multisig::{
    Cosigner, MultisigWallet, PayloadType, Proposal, ProposalOptions, ScriptKind,
};
use crate::signing::{compute_signature, KeyPath};

/// Private side of a cosigner
pub struct TestCosigner {
    pub id: u8,
    pub auth: KeyPair,
    pub master: Xpriv,
}

impl TestCosigner {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            auth: KeyPair::generate(),
            master: Xpriv::new_master(Network::Bitcoin, &[id.wrapping_add(0x40); 32]).unwrap(),
        }
    }

    pub fn cosigner(&self) -> Cosigner {
        Cosigner::new(
            self.id,
            &format!("cosigner{}", self.id),
            self.auth.public_key,
            Xpub::from_priv(&Secp256k1::new(), &self.master),
        )
        .unwrap()
    }

    pub fn create_proof(&self, wallet: &str, options: &ProposalOptions) -> MessageSignature {
        let payload = options.payload(wallet, PayloadType::Create).unwrap();
        sign_message(&self.auth.secret_key, &payload)
    }

    pub fn reject_proof(&self, wallet: &str, proposal: &Proposal) -> MessageSignature {
        sign_message(
            &self.auth.secret_key,
            &proposal.payload(wallet, PayloadType::Reject),
        )
    }

    /// Sign every input the wallet owns, leaving foreign inputs empty
    pub fn sign_inputs(
        &self,
        wallet: &MultisigWallet,
        tx: &Transaction,
        view: &CoinView,
        paths: &[Option<KeyPath>],
    ) -> Vec<Option<Vec<u8>>> {
        let secp = Secp256k1::new();
        paths
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let path = (*path)?;
                let coin = view.coin_for(tx, index)?;
                let key = self
                    .master
                    .derive_priv(&secp, &path.child_numbers().unwrap())
                    .unwrap();
                let ring = wallet.keyring(self.id, path).unwrap();
                Some(
                    compute_signature(tx, index, coin, &ring, &key.private_key, EcdsaSighashType::All)
                        .unwrap(),
                )
            })
            .collect()
    }
}

/// Complete `m`-of-`n` witness wallet named "vault"
pub fn wallet(m: u8, n: u8) -> (MultisigWallet, Vec<TestCosigner>) {
    wallet_of_kind(m, n, ScriptKind::Witness)
}

pub fn wallet_of_kind(m: u8, n: u8, kind: ScriptKind) -> (MultisigWallet, Vec<TestCosigner>) {
    let mut wallet = MultisigWallet::new("vault", m, n, kind).unwrap();
    let signers: Vec<TestCosigner> = (0..n).map(TestCosigner::new).collect();
    for signer in &signers {
        wallet.add_cosigner(signer.cosigner()).unwrap();
    }
    (wallet, signers)
}

/// Options paying `value` to a foreign address
pub fn pay_options(memo: &str, value: u64) -> ProposalOptions {
    ProposalOptions::new(
        memo,
        vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: p2pkh(&[0x77; 20]),
        }],
    )
}
