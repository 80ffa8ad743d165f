//! ECDSA signing and verification of lock inputs.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, PublicKey, Transaction};

use crate::error::ScriptError;
use crate::script::LockScript;

/// BIP-143 sighash message for input `index` spending `lock` worth `value`.
pub fn lock_sighash(
    tx: &Transaction,
    index: usize,
    lock: &LockScript,
    value: Amount,
    sighash_type: EcdsaSighashType,
) -> Result<Message, ScriptError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wsh_signature_hash(index, lock.witness_script(), value, sighash_type)
        .map_err(|e| ScriptError::Sighash(e.to_string()))?;
    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Sign input `index` of `tx` spending `lock`, checking `secret` belongs to `expected`.
#[allow(clippy::too_many_arguments)]
pub fn sign_lock_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    lock: &LockScript,
    value: Amount,
    sighash_type: EcdsaSighashType,
    secret: &SecretKey,
    expected: &PublicKey,
) -> Result<ecdsa::Signature, ScriptError> {
    if PublicKey::new(secret.public_key(secp)) != *expected {
        return Err(ScriptError::WrongKey(expected.to_string()));
    }
    let msg = lock_sighash(tx, index, lock, value, sighash_type)?;
    Ok(ecdsa::Signature {
        signature: secp.sign_ecdsa(&msg, secret),
        sighash_type,
    })
}

/// Verify `signature` by `pubkey` over input `index` spending `lock`.
pub fn verify_lock_signature<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    index: usize,
    lock: &LockScript,
    value: Amount,
    signature: &ecdsa::Signature,
    pubkey: &PublicKey,
) -> Result<bool, ScriptError> {
    let msg = lock_sighash(tx, index, lock, value, signature.sighash_type)?;
    Ok(secp
        .verify_ecdsa(&msg, &signature.signature, &pubkey.inner)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::derive_script;
    use crate::test_utils::{test_keypair, test_params};
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Network, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn spend_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(100),
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(9_000),
                script_pubkey: ScriptBuf::new_p2wsh(&bitcoin::WScriptHash::from_byte_array([1u8; 32])),
            }],
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let secp = Secp256k1::new();
        let lock = derive_script(&test_params(Network::Regtest)).unwrap();
        let (owner_sk, owner_pk) = test_keypair(3);
        let tx = spend_tx();
        let value = Amount::from_sat(10_000);

        let sig = sign_lock_input(
            &secp,
            &tx,
            0,
            &lock,
            value,
            EcdsaSighashType::All,
            &owner_sk,
            &owner_pk,
        )
        .unwrap();
        assert!(verify_lock_signature(&secp, &tx, 0, &lock, value, &sig, &owner_pk).unwrap());

        // Committed amount is part of the BIP-143 message
        let other = Amount::from_sat(10_001);
        assert!(!verify_lock_signature(&secp, &tx, 0, &lock, other, &sig, &owner_pk).unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let secp = Secp256k1::new();
        let lock = derive_script(&test_params(Network::Regtest)).unwrap();
        let (wrong_sk, _) = test_keypair(9);
        let (_, owner_pk) = test_keypair(3);

        let result = sign_lock_input(
            &secp,
            &spend_tx(),
            0,
            &lock,
            Amount::from_sat(10_000),
            EcdsaSighashType::All,
            &wrong_sk,
            &owner_pk,
        );
        assert!(matches!(result, Err(ScriptError::WrongKey(_))));
    }

    #[test]
    fn test_out_of_range_input() {
        let lock = derive_script(&test_params(Network::Regtest)).unwrap();
        let result = lock_sighash(
            &spend_tx(),
            3,
            &lock,
            Amount::from_sat(10_000),
            EcdsaSighashType::All,
        );
        assert!(matches!(result, Err(ScriptError::Sighash(_))));
    }
}
