//! Shared test utilities for bitlock-script tests.

use bitcoin::bip32::Fingerprint;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Amount, Network, PublicKey};
use bitlock_core::{Lock, XpubSources};
use std::str::FromStr;

use crate::script::{derive_script, LockScriptParams};

/// Generate a deterministic keypair from a seed byte.
///
/// The secret key is `[0x01, 0x00, ..., 0x00, seed]` (32 bytes).
pub fn test_keypair(seed_byte: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    secret_bytes[31] = seed_byte;
    secret_bytes[0] = 0x01;
    let sk = SecretKey::from_slice(&secret_bytes).unwrap();
    let pk = PublicKey::new(sk.public_key(&secp));
    (sk, pk)
}

pub fn test_pubkey(seed_byte: u8) -> PublicKey {
    test_keypair(seed_byte).1
}

/// Vault key 1, vault claim key 2, owner key 3; heights 100 / 200 / 300.
pub fn test_params(network: Network) -> LockScriptParams {
    LockScriptParams {
        vault_pubkey: test_pubkey(1),
        vault_claim_pubkey: test_pubkey(2),
        owner_pubkey: test_pubkey(3),
        vault_claim_height: 200,
        open_claim_height: 300,
        created_at_height: 100,
        network,
    }
}

/// A verified lock record matching [`test_params`].
pub fn test_lock(network: Network) -> Lock {
    let params = test_params(network);
    let script = derive_script(&params).unwrap();
    Lock {
        vault_id: 1,
        utxo_id: 1,
        satoshis: Amount::from_sat(2_000),
        utxo_satoshis: None,
        vault_pubkey: params.vault_pubkey,
        vault_claim_pubkey: params.vault_claim_pubkey,
        owner_pubkey: params.owner_pubkey,
        vault_claim_height: params.vault_claim_height,
        open_claim_height: params.open_claim_height,
        created_at_height: params.created_at_height,
        vault_xpub_sources: XpubSources {
            parent_fingerprint: Fingerprint::from_str("00000000").unwrap(),
            cosign_hd_index: 0,
        },
        p2wsh_script_hash_hex: script.script_pubkey_hex(),
        is_verified: true,
    }
}
