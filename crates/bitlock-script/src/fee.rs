//! Release fee estimation
//!
//! Fees are computed from the exact virtual size of the spend with every
//! signature slot filled at its maximum DER length. A release is always priced
//! as a cooperative spend, the largest witness of the three paths, so the fee
//! never under-pays whichever path ends up spending.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut};

use crate::error::ScriptError;
use crate::script::{LockScript, SpendPath};

/// Maximum fee rate accepted (sat/vB). Protects against malicious fee data.
pub const MAX_FEE_RATE_SAT_VB: u64 = 1000;

/// Largest serialized ECDSA signature: 72 bytes of DER plus the sighash byte.
pub const MAX_SIGNATURE_LEN: usize = 73;

/// Fee and remaining output value for a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutput {
    pub fee: Amount,
    pub output_value: Amount,
}

pub(crate) fn check_fee_rate(fee_rate: u64) -> Result<(), ScriptError> {
    if fee_rate == 0 || fee_rate > MAX_FEE_RATE_SAT_VB {
        return Err(ScriptError::InvalidFeeRate(fee_rate));
    }
    Ok(())
}

/// Virtual size of a one-input, one-output spend of `lock` on `path` paying to
/// `destination`, with maximum-size signatures.
pub fn estimate_path_vsize(lock: &LockScript, path: SpendPath, destination: &Script) -> u64 {
    let dummy_sigs = vec![vec![0u8; MAX_SIGNATURE_LEN]; path.required_keys(lock.params()).len()];
    let witness = path
        .witness(&dummy_sigs, lock.witness_script())
        .unwrap_or_default();

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(path.lock_time(lock.params())),
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness,
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: destination.to_owned(),
        }],
    };
    tx.weight().to_vbytes_ceil()
}

/// Fee for `vsize` virtual bytes at `fee_rate` sat/vB.
pub fn fee_for_vsize(vsize: u64, fee_rate: u64) -> Result<Amount, ScriptError> {
    check_fee_rate(fee_rate)?;
    vsize
        .checked_mul(fee_rate)
        .map(Amount::from_sat)
        .ok_or(ScriptError::FeeOverflow)
}

/// Fee for releasing `lock` to `destination` at `fee_rate` sat/vB.
///
/// Priced on the cooperative path regardless of which path eventually spends.
pub fn estimate_fee(
    lock: &LockScript,
    fee_rate: u64,
    destination: &Script,
) -> Result<Amount, ScriptError> {
    check_fee_rate(fee_rate)?;
    let vsize = estimate_path_vsize(lock, SpendPath::Cooperative, destination);
    fee_for_vsize(vsize, fee_rate)
}

/// Value left for `destination` after paying `fee` out of `amount`.
///
/// Fails with `DustOutput` when the fee exceeds the amount or the remainder is
/// at or below the dust threshold of the destination script.
pub fn output_after_fee(
    amount: Amount,
    fee: Amount,
    destination: &Script,
) -> Result<Amount, ScriptError> {
    let threshold = destination.minimal_non_dust();
    let value = amount.checked_sub(fee).ok_or(ScriptError::DustOutput {
        value: Amount::ZERO,
        threshold,
    })?;
    if value <= threshold {
        return Err(ScriptError::DustOutput { value, threshold });
    }
    Ok(value)
}

/// Fee and output value for releasing `funded_amount` from `lock`.
pub fn release_output(
    lock: &LockScript,
    fee_rate: u64,
    destination: &Script,
    funded_amount: Amount,
) -> Result<ReleaseOutput, ScriptError> {
    let fee = estimate_fee(lock, fee_rate, destination)?;
    let output_value = output_after_fee(funded_amount, fee, destination)?;
    Ok(ReleaseOutput { fee, output_value })
}
