//! Collateral lock records
//!
//! The ledger owns these records; this crate only reads them. A [`Lock`] is
//! immutable after creation except for `is_verified` and `utxo_satoshis`, which
//! the ledger sets once funding has been confirmed.

use bitcoin::bip32::Fingerprint;
use bitcoin::{Amount, OutPoint, PublicKey, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Block height on the Bitcoin chain.
pub type BlockHeight = u32;

/// Commitment to the custodian child key authorized to cosign a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpubSources {
    /// Fingerprint of the custodian key the cosign key is derived from
    #[serde(with = "fingerprint_serde")]
    pub parent_fingerprint: Fingerprint,
    /// Non-hardened child index of the cosign key
    pub cosign_hd_index: u32,
}

/// A Bitcoin collateral lock as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub vault_id: u32,
    pub utxo_id: u64,
    /// Amount committed at creation
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub satoshis: Amount,
    /// Amount actually funded, once the ledger has seen the funding output
    #[serde(default, with = "bitcoin::amount::serde::as_sat::opt")]
    pub utxo_satoshis: Option<Amount>,
    /// Custodian key for the cooperative path
    pub vault_pubkey: PublicKey,
    /// Custodian key for the unilateral claim path
    pub vault_claim_pubkey: PublicKey,
    pub owner_pubkey: PublicKey,
    pub vault_claim_height: BlockHeight,
    pub open_claim_height: BlockHeight,
    pub created_at_height: BlockHeight,
    pub vault_xpub_sources: XpubSources,
    /// Hex of the P2WSH scriptPubkey committed at creation
    pub p2wsh_script_hash_hex: String,
    pub is_verified: bool,
}

impl Lock {
    /// The amount the funding output actually carries.
    ///
    /// `utxo_satoshis` overrides `satoshis` once the ledger knows it.
    pub fn funded_amount(&self) -> Amount {
        self.utxo_satoshis.unwrap_or(self.satoshis)
    }

    /// Whether the lock can enter a cooperative release.
    pub fn is_releasable(&self) -> bool {
        self.is_verified
    }
}

/// Owner request to release a lock cooperatively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Where the released collateral is paid
    pub to_script_pubkey: ScriptBuf,
    /// Fee the release transaction pays
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub bitcoin_network_fee: Amount,
}

/// The outpoint currently funding a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoRef {
    pub txid: Txid,
    pub vout: u32,
}

impl UtxoRef {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

impl From<OutPoint> for UtxoRef {
    fn from(outpoint: OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
        }
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Custodian signature over a release skeleton, as persisted by the ledger.
///
/// Carries the reference it was made over so the owner can detect that the
/// funding outpoint moved, and the ledger height at which the release inputs
/// were read so they can be re-read after pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignRecord {
    /// DER signature with trailing sighash byte
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub utxo_ref: UtxoRef,
    /// Txid of the unsigned skeleton the signature commits to
    pub skeleton_txid: Txid,
    pub signed_at_height: BlockHeight,
}

mod fingerprint_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(value: &Fingerprint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fingerprint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_str(&s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
