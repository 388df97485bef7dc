//! CLI commands for the coordinator
//!
//! Implements the command handlers behind the `coordinator` binary.

use std::sync::Arc;

use bitcoin::{Amount, Network};
use rand::RngCore;
use secp256k1::Secp256k1;

use crate::config::CoordinatorConfig;
use crate::coordinator::{ProposalCoordinator, ProposalDb};
use crate::core::script::p2wpkh;
use crate::core::{encode_transaction, EcdsaSighashType, TxOut};
use crate::crypto::{sign_message, KeyPair, Xpriv, Xpub};
use crate::ledger::MemoryLedger;
use crate::multisig::{
    Cosigner, MultisigWallet, PayloadType, Proposal, ProposalOptions, ScriptKind,
};
use crate::signing::compute_signature;
use crate::storage::FileStore;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One demo party: authentication key and signing master key
struct Party {
    auth: KeyPair,
    master: Xpriv,
}

impl Party {
    fn generate() -> CliResult<Self> {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Ok(Self {
            auth: KeyPair::generate(),
            master: Xpriv::new_master(Network::Bitcoin, &seed)?,
        })
    }
}

/// Sign every wallet input of a proposal as cosigner `id`
async fn sign_proposal(
    coordinator: &ProposalCoordinator,
    id: u8,
    party: &Party,
    proposal_id: u32,
) -> CliResult<Vec<Option<Vec<u8>>>> {
    let tx = coordinator.get_proposal_transaction(proposal_id).await?;
    let inputs = coordinator.get_proposal_inputs(proposal_id).await?;

    let secp = Secp256k1::new();
    let mut signatures = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let (Some(coin), Some(path)) = (&input.coin, input.path) else {
            signatures.push(None);
            continue;
        };
        let key = party.master.derive_priv(&secp, &path.child_numbers()?)?;
        let ring = coordinator.wallet().keyring(id, path)?;
        signatures.push(Some(compute_signature(
            &tx,
            index,
            coin,
            &ring,
            &key.private_key,
            EcdsaSighashType::All,
        )?));
    }
    Ok(signatures)
}

/// Run a 2-of-2 proposal from creation to confirmation
pub async fn cmd_demo(config: CoordinatorConfig) -> CliResult<()> {
    let store = Arc::new(FileStore::open(config.storage.clone())?);
    let parties = [Party::generate()?, Party::generate()?];

    let mut wallet = MultisigWallet::new("demo", 2, 2, ScriptKind::Witness)?;
    for (id, party) in parties.iter().enumerate() {
        let cosigner = Cosigner::new(
            id as u8,
            &format!("cosigner{}", id),
            party.auth.public_key,
            Xpub::from_priv(&Secp256k1::new(), &party.master),
        )?;
        let proof = sign_message(&party.auth.secret_key, &cosigner.join_payload(&wallet.name));
        if !cosigner.verify_join(&wallet.name, &proof) {
            return Err(format!("join proof of cosigner {} rejected", id).into());
        }
        wallet.add_cosigner(cosigner)?;
    }
    println!("🔐 Wallet {} ({})", wallet.name, wallet.description());

    let ledger = Arc::new(MemoryLedger::new(wallet.clone()));
    let coin = ledger.fund(200_000_000).await?;
    println!("   💰 Funded {} with {}", coin.outpoint, coin.value);

    let coordinator = ProposalCoordinator::new(wallet.clone(), ledger, store, config)?;
    let mut events = coordinator.subscribe();

    let options = ProposalOptions::new(
        "demo payment",
        vec![TxOut {
            value: Amount::from_sat(100_000_000),
            script_pubkey: p2wpkh(&KeyPair::generate().pubkey_hash()),
        }],
    );
    let payload = options.payload(&wallet.name, PayloadType::Create)?;
    let proof = sign_message(&parties[0].auth.secret_key, &payload);
    let proposal = coordinator.create_proposal(&options, 0, proof).await?;
    println!("\n📝 Proposal {} created: {:?}", proposal.id, proposal.memo);

    for (id, party) in parties.iter().enumerate() {
        let id = id as u8;
        let signatures = sign_proposal(&coordinator, id, party, proposal.id).await?;
        let updated = coordinator
            .approve_proposal(proposal.id, id, signatures)
            .await?;
        println!(
            "   ✍️  Cosigner {} approved ({}/{}), status {}",
            id,
            updated.approvals.len(),
            updated.m,
            updated.status
        );
    }

    let tx = coordinator.send_proposal(proposal.id).await?;
    coordinator.on_tx_confirmed(&tx).await?;
    println!("\n🚀 Sent transaction {}", tx.compute_txid());
    println!("   ├─ Inputs: {}", tx.input.len());
    println!("   ├─ Outputs: {}", tx.output.len());
    println!("   └─ Size: {} bytes", encode_transaction(&tx).len());

    println!("\n📣 Events:");
    while let Ok(event) = events.try_recv() {
        println!("   {}", serde_json::to_string(&event)?);
    }
    Ok(())
}

/// List stored proposals of an `m`-of-`n` wallet
pub async fn cmd_list(config: CoordinatorConfig, m: u8, n: u8) -> CliResult<()> {
    let store = FileStore::open(config.storage.clone())?;
    let db = ProposalDb::new(Arc::new(store), m, n);
    let proposals = db.all_proposals().await?;

    if proposals.is_empty() {
        println!("📭 No proposals in {:?}", config.storage.data_dir);
        return Ok(());
    }

    println!("📋 {} proposal(s)", proposals.len());
    for proposal in &proposals {
        println!(
            "   #{} {:<9} approvals {} rejections {}  {:?}",
            proposal.id,
            proposal.status,
            proposal.approvals.len(),
            proposal.rejections.len(),
            proposal.memo
        );
    }
    println!("   🔒 Locked coins: {}", db.locked_coins().await?.len());
    Ok(())
}

/// Decode a hex proposal record and print it as JSON
pub fn cmd_inspect(record: &str, m: u8, n: u8) -> CliResult<()> {
    let bytes = hex::decode(record.trim())?;
    let proposal = Proposal::decode(&bytes, m, n)?;
    println!("{}", serde_json::to_string_pretty(&proposal)?);
    Ok(())
}
