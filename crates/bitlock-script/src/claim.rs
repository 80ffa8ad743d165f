//! Unilateral claim paths
//!
//! After `vault_claim_height` the custodian may sweep a lock alone; after
//! `open_claim_height` the owner may. Both spends set `nLockTime` to the
//! threshold and use a non-final sequence so `OP_CHECKLOCKTIMEVERIFY` is
//! enforced. Whether the threshold has passed is decided by the network, not
//! here: a claim built early is simply not mineable yet.

use bitcoin::absolute::LockTime;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, PublicKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use bitlock_core::BlockHeight;
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;
use crate::fee::{estimate_path_vsize, fee_for_vsize, output_after_fee};
use crate::script::{LockScript, SpendPath};
use crate::sign::sign_lock_input;

/// A single-signature spend path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimPath {
    Vault,
    Owner,
}

impl ClaimPath {
    pub fn spend_path(&self) -> SpendPath {
        match self {
            ClaimPath::Vault => SpendPath::VaultClaim,
            ClaimPath::Owner => SpendPath::OwnerClaim,
        }
    }

    /// Height the claim's nLockTime is set to.
    pub fn threshold(&self, lock: &LockScript) -> BlockHeight {
        self.spend_path().lock_time(lock.params())
    }

    pub fn signing_key(&self, lock: &LockScript) -> PublicKey {
        match self {
            ClaimPath::Vault => lock.params().vault_claim_pubkey,
            ClaimPath::Owner => lock.params().owner_pubkey,
        }
    }

    /// Whether a claim can be mined in the block after `tip_height`.
    ///
    /// Informational only.
    pub fn is_mature(&self, lock: &LockScript, tip_height: BlockHeight) -> bool {
        tip_height >= self.threshold(lock)
    }
}

/// Unsigned claim and its accounting.
#[derive(Debug, Clone)]
pub struct ClaimPsbt {
    pub psbt: Psbt,
    pub fee: Amount,
    pub claim_amount: Amount,
}

/// Build an unsigned PSBT sweeping `utxo` to `destination` along `path`.
pub fn build_claim_psbt(
    lock: &LockScript,
    path: ClaimPath,
    utxo: (OutPoint, TxOut),
    destination: &Script,
    fee_rate: u64,
) -> Result<ClaimPsbt, ScriptError> {
    let (outpoint, txout) = utxo;

    let vsize = estimate_path_vsize(lock, path.spend_path(), destination);
    let fee = fee_for_vsize(vsize, fee_rate)?;
    let claim_amount = output_after_fee(txout.value, fee, destination)?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(path.threshold(lock)),
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: claim_amount,
            script_pubkey: destination.to_owned(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|e| ScriptError::Psbt(format!("PSBT creation failed: {}", e)))?;
    psbt.inputs[0].witness_utxo = Some(txout);
    psbt.inputs[0].witness_script = Some(lock.witness_script().to_owned());

    Ok(ClaimPsbt {
        psbt,
        fee,
        claim_amount,
    })
}

/// Sign a claim PSBT and return the finished transaction.
pub fn sign_claim(
    psbt: &Psbt,
    lock: &LockScript,
    path: ClaimPath,
    secret: &SecretKey,
) -> Result<Transaction, ScriptError> {
    if psbt.inputs.len() != 1 || psbt.unsigned_tx.output.is_empty() {
        return Err(ScriptError::EmptyPsbt);
    }
    let prevout = psbt.inputs[0]
        .witness_utxo
        .as_ref()
        .ok_or_else(|| ScriptError::Psbt("missing witness UTXO".into()))?;
    if prevout.script_pubkey.as_script() != lock.script_pubkey() {
        return Err(ScriptError::Psbt("input does not spend this lock".into()));
    }

    let secp = Secp256k1::signing_only();
    let signature = sign_lock_input(
        &secp,
        &psbt.unsigned_tx,
        0,
        lock,
        prevout.value,
        EcdsaSighashType::All,
        secret,
        &path.signing_key(lock),
    )?;

    let mut tx = psbt.unsigned_tx.clone();
    tx.input[0].witness = path
        .spend_path()
        .witness(&[signature.to_vec()], lock.witness_script())?;
    Ok(tx)
}
