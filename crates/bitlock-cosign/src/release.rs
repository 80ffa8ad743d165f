//! Cooperative release
//!
//! # Flow
//!
//! 1. Anyone re-derives the unsigned skeleton via [`build_release_skeleton`]
//!    from the lock, the release request and the funding reference
//! 2. Custodian checks funding ([`check_funding`]) and signs via [`vault_sign`]
//! 3. Owner verifies the custodian signature and finishes via [`finalize_release`]
//!
//! The skeleton is never stored. Every party rebuilds it from the same ledger
//! records and gets the same bytes.
//!
//! The custodian signs `SIGHASH_SINGLE|ANYONECANPAY`, committing only to the
//! lock input and the release output, so the owner can append orphaned inputs
//! and a recovery output afterwards.

use bitcoin::absolute::LockTime;
use bitcoin::ecdsa;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Network, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use bitlock_core::{BlockHeight, CosignRecord, Lock, ReleaseRequest, UtxoRef};
use bitlock_script::fee::output_after_fee;
use bitlock_script::sign::{sign_lock_input, verify_lock_signature};
use bitlock_script::{verify_lock_commitment, LockScript, SpendPath};

use crate::derivation::CosignKey;
use crate::error::{from_script, CosignError, KeyMismatch};
use crate::orphan::{plan_consolidation, sign_orphan_input, Consolidation, OrphanedOutput};

/// Sighash type of the custodian's cooperative signature.
pub const VAULT_SIGHASH_TYPE: EcdsaSighashType = EcdsaSighashType::SinglePlusAnyoneCanPay;

/// Unsigned cooperative release derived from ledger records.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseSkeleton {
    utxo_id: u64,
    lock_script: LockScript,
    utxo_ref: UtxoRef,
    funded_amount: Amount,
    fee: Amount,
    psbt: Psbt,
}

impl ReleaseSkeleton {
    pub fn utxo_id(&self) -> u64 {
        self.utxo_id
    }

    pub fn lock_script(&self) -> &LockScript {
        &self.lock_script
    }

    pub fn utxo_ref(&self) -> &UtxoRef {
        &self.utxo_ref
    }

    pub fn funded_amount(&self) -> Amount {
        self.funded_amount
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    pub fn unsigned_tx(&self) -> &Transaction {
        &self.psbt.unsigned_tx
    }

    pub fn release_output(&self) -> &TxOut {
        &self.psbt.unsigned_tx.output[0]
    }

    /// Txid of the unsigned skeleton; what a [`CosignRecord`] commits to.
    pub fn txid(&self) -> Txid {
        self.psbt.unsigned_tx.compute_txid()
    }
}

/// Rebuild the unsigned release transaction for a lock.
///
/// Deterministic: the same records always give a byte-identical PSBT.
pub fn build_release_skeleton(
    lock: &Lock,
    request: &ReleaseRequest,
    utxo_ref: &UtxoRef,
    network: Network,
) -> Result<ReleaseSkeleton, CosignError> {
    if !lock.is_releasable() {
        return Err(CosignError::LockNotVerified(lock.utxo_id));
    }
    let lock_script = verify_lock_commitment(lock, network).map_err(from_script)?;

    let funded_amount = lock.funded_amount();
    let fee = request.bitcoin_network_fee;
    let value = output_after_fee(funded_amount, fee, &request.to_script_pubkey).map_err(from_script)?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(lock.created_at_height),
        input: vec![TxIn {
            previous_output: utxo_ref.outpoint(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value,
            script_pubkey: request.to_script_pubkey.clone(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| {
        CosignError::Construction(bitlock_script::ScriptError::Psbt(e.to_string()))
    })?;
    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: funded_amount,
        script_pubkey: lock_script.script_pubkey().to_owned(),
    });
    psbt.inputs[0].witness_script = Some(lock_script.witness_script().to_owned());

    Ok(ReleaseSkeleton {
        utxo_id: lock.utxo_id,
        lock_script,
        utxo_ref: *utxo_ref,
        funded_amount,
        fee,
        psbt,
    })
}

/// Check that `funding_tx` really created the output the skeleton spends.
pub fn check_funding(skeleton: &ReleaseSkeleton, funding_tx: &Transaction) -> Result<(), CosignError> {
    let utxo_ref = skeleton.utxo_ref();
    if funding_tx.compute_txid() != utxo_ref.txid {
        return Err(CosignError::StaleReference(format!(
            "node returned {} for {}",
            funding_tx.compute_txid(),
            utxo_ref
        )));
    }
    let output = funding_tx
        .output
        .get(utxo_ref.vout as usize)
        .ok_or_else(|| CosignError::StaleReference(format!("{} has no such output", utxo_ref)))?;

    if output.script_pubkey.as_script() != skeleton.lock_script().script_pubkey() {
        return Err(CosignError::StaleReference(format!(
            "{} does not pay the lock script",
            utxo_ref
        )));
    }
    if output.value != skeleton.funded_amount() {
        return Err(CosignError::StaleReference(format!(
            "{} carries {}, lock records {}",
            utxo_ref,
            output.value,
            skeleton.funded_amount()
        )));
    }
    Ok(())
}

/// Custodian step: sign the skeleton with a verified cosign key.
pub fn vault_sign(
    skeleton: &ReleaseSkeleton,
    key: &CosignKey,
    signed_at_height: BlockHeight,
) -> Result<CosignRecord, CosignError> {
    let vault_pubkey = skeleton.lock_script().params().vault_pubkey;
    if *key.pubkey() != vault_pubkey {
        return Err(KeyMismatch::ChildKey {
            index: key.sources().cosign_hd_index,
            derived: key.pubkey().to_string(),
            recorded: vault_pubkey.to_string(),
        }
        .into());
    }

    let secp = Secp256k1::signing_only();
    let signature = sign_lock_input(
        &secp,
        skeleton.unsigned_tx(),
        0,
        skeleton.lock_script(),
        skeleton.funded_amount(),
        VAULT_SIGHASH_TYPE,
        key.secret(),
        &vault_pubkey,
    )
    .map_err(from_script)?;

    Ok(CosignRecord {
        signature: signature.to_vec(),
        utxo_ref: *skeleton.utxo_ref(),
        skeleton_txid: skeleton.txid(),
        signed_at_height,
    })
}

/// Check a custodian record against the skeleton it claims to sign.
pub fn verify_vault_signature(
    skeleton: &ReleaseSkeleton,
    record: &CosignRecord,
) -> Result<ecdsa::Signature, CosignError> {
    if record.utxo_ref != *skeleton.utxo_ref() {
        return Err(CosignError::StaleReference(format!(
            "signature covers {}, lock is funded by {}",
            record.utxo_ref,
            skeleton.utxo_ref()
        )));
    }
    if record.skeleton_txid != skeleton.txid() {
        return Err(CosignError::StaleReference(format!(
            "signature covers skeleton {}, rebuilt skeleton is {}",
            record.skeleton_txid,
            skeleton.txid()
        )));
    }

    let signature = ecdsa::Signature::from_slice(&record.signature)
        .map_err(|e| CosignError::SignatureInvalid(e.to_string()))?;
    if signature.sighash_type != VAULT_SIGHASH_TYPE {
        return Err(CosignError::SignatureInvalid(format!(
            "sighash type {} (expected {})",
            signature.sighash_type, VAULT_SIGHASH_TYPE
        )));
    }

    let secp = Secp256k1::verification_only();
    let valid = verify_lock_signature(
        &secp,
        skeleton.unsigned_tx(),
        0,
        skeleton.lock_script(),
        skeleton.funded_amount(),
        &signature,
        &skeleton.lock_script().params().vault_pubkey,
    )
    .map_err(from_script)?;
    if !valid {
        return Err(CosignError::SignatureInvalid(
            "custodian signature does not verify".into(),
        ));
    }
    Ok(signature)
}

/// A fully signed release, ready to broadcast.
#[derive(Debug, Clone)]
pub struct FinalizedRelease {
    pub tx: Transaction,
    /// Raw transaction hex for broadcast
    pub tx_hex: String,
    /// Orphaned outputs swept into the release, if any
    pub consolidation: Option<Consolidation>,
}

impl FinalizedRelease {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}

/// Owner step: verify the custodian signature, sweep orphans, sign and assemble.
///
/// `orphans` are swept at `consolidation_fee_rate` sat/vB; when their value
/// would not survive the extra fee they are left alone.
pub fn finalize_release(
    skeleton: &ReleaseSkeleton,
    record: &CosignRecord,
    owner_secret: &SecretKey,
    orphans: Vec<OrphanedOutput>,
    consolidation_fee_rate: u64,
) -> Result<FinalizedRelease, CosignError> {
    let vault_signature = verify_vault_signature(skeleton, record)?;
    let params = *skeleton.lock_script().params();
    let owner_pubkey: PublicKey = params.owner_pubkey;

    let secp = Secp256k1::signing_only();
    if PublicKey::new(owner_secret.public_key(&secp)) != owner_pubkey {
        return Err(CosignError::SignatureInvalid(
            "owner secret does not match the lock's owner key".into(),
        ));
    }

    let consolidation = plan_consolidation(
        orphans,
        &skeleton.release_output().script_pubkey,
        consolidation_fee_rate,
    )
    .map_err(from_script)?;

    let mut tx = skeleton.unsigned_tx().clone();
    if let Some(plan) = &consolidation {
        for orphan in &plan.inputs {
            tx.input.push(TxIn {
                previous_output: orphan.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }
        tx.output.push(plan.recovery_output.clone());
    }

    let owner_signature = sign_lock_input(
        &secp,
        &tx,
        0,
        skeleton.lock_script(),
        skeleton.funded_amount(),
        EcdsaSighashType::All,
        owner_secret,
        &owner_pubkey,
    )
    .map_err(from_script)?;

    if let Some(plan) = &consolidation {
        for (i, orphan) in plan.inputs.iter().enumerate() {
            sign_orphan_input(&secp, &mut tx, i + 1, orphan, &owner_pubkey, owner_secret)
                .map_err(from_script)?;
        }
    }

    tx.input[0].witness = SpendPath::Cooperative
        .witness(
            &[vault_signature.to_vec(), owner_signature.to_vec()],
            skeleton.lock_script().witness_script(),
        )
        .map_err(from_script)?;

    let tx_hex = bitcoin::consensus::encode::serialize_hex(&tx);
    Ok(FinalizedRelease {
        tx,
        tx_hex,
        consolidation,
    })
}
