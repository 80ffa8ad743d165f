//! Orphaned output consolidation
//!
//! Funds sent to the owner's lock key outside the lock script are swept into
//! the cooperative release. The owner key is matched under four encodings:
//!
//! | Encoding        | Descriptor     | Spend                                 |
//! |-----------------|----------------|---------------------------------------|
//! | Native segwit   | `wpkh(K)`      | witness `[sig, K]`                    |
//! | Wrapped segwit  | `sh(wpkh(K))`  | scriptSig `<redeem>`, witness `[sig, K]` |
//! | Wrapped legacy  | `sh(pkh(K))`   | scriptSig `<sig> <K> <redeem>`        |
//! | Legacy          | `pkh(K)`       | scriptSig `<sig> <K>`                 |
//!
//! Each swept input is signed on its own with `SIGHASH_ALL`. The recovered
//! value, net of the weight the extra inputs and the recovery output add, is
//! paid to the release destination as a second output.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Amount, OutPoint, PublicKey, Script, ScriptBuf, Transaction, TxOut, Weight, Witness,
};
use bitlock_script::ScriptError;
use miniscript::Descriptor;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Weight of a `TxIn` with empty scriptSig and witness: outpoint, script length, sequence.
const BASE_INPUT_WEIGHT: u64 = (32 + 4 + 1 + 4) * 4;

/// How an orphaned output encodes the owner key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerEncoding {
    NativeSegwit,
    WrappedSegwit,
    WrappedLegacy,
    Legacy,
}

impl OwnerEncoding {
    pub const ALL: [OwnerEncoding; 4] = [
        OwnerEncoding::NativeSegwit,
        OwnerEncoding::WrappedSegwit,
        OwnerEncoding::WrappedLegacy,
        OwnerEncoding::Legacy,
    ];

    /// Output descriptor for `owner` under this encoding.
    pub fn descriptor(&self, owner: &PublicKey) -> Result<Descriptor<PublicKey>, miniscript::Error> {
        let s = match self {
            OwnerEncoding::NativeSegwit => format!("wpkh({})", owner),
            OwnerEncoding::WrappedSegwit => format!("sh(wpkh({}))", owner),
            OwnerEncoding::WrappedLegacy => format!("sh(pkh({}))", owner),
            OwnerEncoding::Legacy => format!("pkh({})", owner),
        };
        Descriptor::from_str(&s)
    }

    pub fn is_segwit(&self) -> bool {
        matches!(self, OwnerEncoding::NativeSegwit | OwnerEncoding::WrappedSegwit)
    }

    /// Inner script for P2SH encodings.
    fn redeem_script(&self, owner: &PublicKey) -> Option<ScriptBuf> {
        match self {
            OwnerEncoding::WrappedSegwit => {
                Some(ScriptBuf::new_p2wpkh(&owner.wpubkey_hash().ok()?))
            }
            OwnerEncoding::WrappedLegacy => Some(ScriptBuf::new_p2pkh(&owner.pubkey_hash())),
            _ => None,
        }
    }
}

/// An output of an auxiliary transaction paying the owner key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedOutput {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub encoding: OwnerEncoding,
    /// Upper bound on the weight of the satisfied input
    pub input_weight: Weight,
}

/// Outputs of `tx` that pay `owner` under any supported encoding.
///
/// An encoding that cannot be built for the key (an uncompressed key has no
/// segwit form) is skipped; the others are still scanned.
pub fn find_orphaned_outputs(tx: &Transaction, owner: &PublicKey) -> Vec<OrphanedOutput> {
    let txid = tx.compute_txid();
    let mut candidates = Vec::new();

    for encoding in OwnerEncoding::ALL {
        let descriptor = match encoding.descriptor(owner) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Skipping {:?} encoding for {}: {}", encoding, owner, e);
                continue;
            }
        };
        let satisfaction = match descriptor.max_weight_to_satisfy() {
            Ok(w) => w,
            Err(e) => {
                log::debug!("No satisfaction weight for {:?}: {}", encoding, e);
                continue;
            }
        };
        let script_pubkey = descriptor.script_pubkey();

        for (vout, txout) in tx.output.iter().enumerate() {
            if txout.script_pubkey == script_pubkey {
                candidates.push(OrphanedOutput {
                    outpoint: OutPoint::new(txid, vout as u32),
                    txout: txout.clone(),
                    encoding,
                    input_weight: Weight::from_wu(BASE_INPUT_WEIGHT) + satisfaction,
                });
            }
        }
    }

    candidates.sort_by_key(|c| c.outpoint.vout);
    candidates
}

/// Orphans to sweep and the output that recovers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consolidation {
    pub inputs: Vec<OrphanedOutput>,
    pub recovery_output: TxOut,
    pub fee: Amount,
}

/// Price sweeping `orphans` into a recovery output paying `destination`.
///
/// Returns `None` when there is nothing to sweep or the recovered value would
/// be dust.
pub fn plan_consolidation(
    orphans: Vec<OrphanedOutput>,
    destination: &Script,
    fee_rate: u64,
) -> Result<Option<Consolidation>, ScriptError> {
    if orphans.is_empty() {
        return Ok(None);
    }

    let recovery_template = TxOut {
        value: Amount::ZERO,
        script_pubkey: destination.to_owned(),
    };
    let added_weight = orphans
        .iter()
        .fold(recovery_template.weight(), |acc, o| acc + o.input_weight);
    let fee = bitlock_script::fee::fee_for_vsize(added_weight.to_vbytes_ceil(), fee_rate)?;

    let total: Amount = orphans.iter().map(|o| o.txout.value).sum();
    let recovered = match bitlock_script::fee::output_after_fee(total, fee, destination) {
        Ok(v) => v,
        Err(ScriptError::DustOutput { value, threshold }) => {
            log::warn!(
                "Skipping consolidation of {} orphaned output(s): {} left after {} fee is below {}",
                orphans.len(),
                value,
                fee,
                threshold
            );
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    Ok(Some(Consolidation {
        inputs: orphans,
        recovery_output: TxOut {
            value: recovered,
            script_pubkey: destination.to_owned(),
        },
        fee,
    }))
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, ScriptError> {
    PushBytesBuf::try_from(bytes).map_err(|e| ScriptError::Psbt(e.to_string()))
}

/// Sign input `index` of `tx`, which spends `orphan`, with the owner key.
///
/// All inputs and outputs must already be in place: the signature commits to
/// the whole transaction.
pub fn sign_orphan_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &mut Transaction,
    index: usize,
    orphan: &OrphanedOutput,
    owner: &PublicKey,
    secret: &SecretKey,
) -> Result<(), ScriptError> {
    if PublicKey::new(secret.public_key(secp)) != *owner {
        return Err(ScriptError::WrongKey(owner.to_string()));
    }
    let sighash_type = EcdsaSighashType::All;
    let sig_error = |e: &dyn std::fmt::Display| ScriptError::Sighash(e.to_string());

    let msg = {
        let mut cache = SighashCache::new(&*tx);
        match orphan.encoding {
            OwnerEncoding::NativeSegwit => {
                let digest = cache
                    .p2wpkh_signature_hash(index, &orphan.txout.script_pubkey, orphan.txout.value, sighash_type)
                    .map_err(|e| sig_error(&e))?;
                Message::from_digest(digest.to_byte_array())
            }
            OwnerEncoding::WrappedSegwit => {
                let redeem = orphan
                    .encoding
                    .redeem_script(owner)
                    .ok_or_else(|| ScriptError::UncompressedKey(owner.to_string()))?;
                let digest = cache
                    .p2wpkh_signature_hash(index, &redeem, orphan.txout.value, sighash_type)
                    .map_err(|e| sig_error(&e))?;
                Message::from_digest(digest.to_byte_array())
            }
            OwnerEncoding::WrappedLegacy => {
                let redeem = ScriptBuf::new_p2pkh(&owner.pubkey_hash());
                let digest = cache
                    .legacy_signature_hash(index, &redeem, sighash_type.to_u32())
                    .map_err(|e| sig_error(&e))?;
                Message::from_digest(digest.to_byte_array())
            }
            OwnerEncoding::Legacy => {
                let digest = cache
                    .legacy_signature_hash(index, &orphan.txout.script_pubkey, sighash_type.to_u32())
                    .map_err(|e| sig_error(&e))?;
                Message::from_digest(digest.to_byte_array())
            }
        }
    };

    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&msg, secret),
        sighash_type,
    };
    let sig = signature.to_vec();
    let key = owner.to_bytes();

    let input = tx
        .input
        .get_mut(index)
        .ok_or_else(|| ScriptError::Sighash(format!("input {} out of range", index)))?;

    match orphan.encoding {
        OwnerEncoding::NativeSegwit => {
            input.witness = Witness::from_slice(&[sig, key]);
        }
        OwnerEncoding::WrappedSegwit => {
            let redeem = orphan
                .encoding
                .redeem_script(owner)
                .ok_or_else(|| ScriptError::UncompressedKey(owner.to_string()))?;
            input.script_sig = Builder::new()
                .push_slice(push_bytes(redeem.into_bytes())?)
                .into_script();
            input.witness = Witness::from_slice(&[sig, key]);
        }
        OwnerEncoding::WrappedLegacy => {
            let redeem = ScriptBuf::new_p2pkh(&owner.pubkey_hash());
            input.script_sig = Builder::new()
                .push_slice(push_bytes(sig)?)
                .push_key(owner)
                .push_slice(push_bytes(redeem.into_bytes())?)
                .into_script();
        }
        OwnerEncoding::Legacy => {
            input.script_sig = Builder::new()
                .push_slice(push_bytes(sig)?)
                .push_key(owner)
                .into_script();
        }
    }
    Ok(())
}
