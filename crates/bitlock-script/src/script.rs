//! Collateral lock script
//!
//! A lock is a P2WSH output with three spend conditions:
//!
//! ```text
//! OP_IF
//!     <created_at> CLTV DROP <vault> CHECKSIGVERIFY <owner> CHECKSIG
//! OP_ELSE
//!     OP_IF
//!         <vault_claim_height> CLTV DROP <vault_claim> CHECKSIG
//!     OP_ELSE
//!         <open_claim_height> CLTV DROP <owner> CHECKSIG
//!     OP_ENDIF
//! OP_ENDIF
//! ```
//!
//! **Cooperative** (outer `IF` taken):
//!   - Witness: `[<sig_owner>, <sig_vault>, 0x01, <witness_script>]`
//!
//! **Vault claim** (outer `ELSE`, inner `IF`):
//!   - Witness: `[<sig_vault_claim>, 0x01, <empty>, <witness_script>]`
//!
//! **Owner claim** (both `ELSE`):
//!   - Witness: `[<sig_owner>, <empty>, <empty>, <witness_script>]`
//!
//! The owner key appears in two branches, which rules out a miniscript
//! descriptor; the script and its witnesses are assembled directly.

use bitcoin::absolute::LockTime;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF,
};
use bitcoin::script::Builder;
use bitcoin::{Address, Network, PublicKey, Script, ScriptBuf, Witness};
use bitlock_core::{BlockHeight, Lock};
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;

/// Inputs to lock script derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockScriptParams {
    pub vault_pubkey: PublicKey,
    pub vault_claim_pubkey: PublicKey,
    pub owner_pubkey: PublicKey,
    pub vault_claim_height: BlockHeight,
    pub open_claim_height: BlockHeight,
    pub created_at_height: BlockHeight,
    pub network: Network,
}

impl LockScriptParams {
    pub fn from_lock(lock: &Lock, network: Network) -> Self {
        Self {
            vault_pubkey: lock.vault_pubkey,
            vault_claim_pubkey: lock.vault_claim_pubkey,
            owner_pubkey: lock.owner_pubkey,
            vault_claim_height: lock.vault_claim_height,
            open_claim_height: lock.open_claim_height,
            created_at_height: lock.created_at_height,
            network,
        }
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for height in [
            self.created_at_height,
            self.vault_claim_height,
            self.open_claim_height,
        ] {
            to_lock_time(height)?;
        }

        if !(self.created_at_height < self.vault_claim_height
            && self.vault_claim_height < self.open_claim_height)
        {
            return Err(ScriptError::InvalidHeights {
                created_at: self.created_at_height,
                vault_claim: self.vault_claim_height,
                open_claim: self.open_claim_height,
            });
        }

        for key in [self.vault_pubkey, self.vault_claim_pubkey, self.owner_pubkey] {
            if !key.compressed {
                return Err(ScriptError::UncompressedKey(key.to_string()));
            }
        }

        Ok(())
    }
}

fn to_lock_time(height: BlockHeight) -> Result<LockTime, ScriptError> {
    LockTime::from_height(height).map_err(|_| ScriptError::InvalidHeight(height))
}

/// A derived lock: witness script, P2WSH output and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockScript {
    params: LockScriptParams,
    witness_script: ScriptBuf,
    script_pubkey: ScriptBuf,
    address: Address,
}

/// Derive the lock script for `params`.
///
/// Heights and keys are validated before anything is built; on error no
/// script is produced. The witness script is identical on every network,
/// only the address encoding differs.
pub fn derive_script(params: &LockScriptParams) -> Result<LockScript, ScriptError> {
    params.validate()?;

    let witness_script = Builder::new()
        .push_opcode(OP_IF)
        .push_lock_time(to_lock_time(params.created_at_height)?)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&params.vault_pubkey)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_key(&params.owner_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_IF)
        .push_lock_time(to_lock_time(params.vault_claim_height)?)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&params.vault_claim_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_lock_time(to_lock_time(params.open_claim_height)?)
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_key(&params.owner_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_ENDIF)
        .into_script();

    let script_pubkey = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
    let address = Address::p2wsh(&witness_script, params.network);

    Ok(LockScript {
        params: *params,
        witness_script,
        script_pubkey,
        address,
    })
}

impl LockScript {
    /// Derive the script for a ledger lock record.
    pub fn for_lock(lock: &Lock, network: Network) -> Result<Self, ScriptError> {
        derive_script(&LockScriptParams::from_lock(lock, network))
    }

    pub fn params(&self) -> &LockScriptParams {
        &self.params
    }

    pub fn witness_script(&self) -> &Script {
        &self.witness_script
    }

    pub fn script_pubkey(&self) -> &Script {
        &self.script_pubkey
    }

    /// Lowercase hex of the P2WSH scriptPubkey, as recorded on the ledger.
    pub fn script_pubkey_hex(&self) -> String {
        self.script_pubkey.to_hex_string()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn network(&self) -> Network {
        self.params.network
    }

    /// Whether `recorded` (hex, optional `0x`, any case) commits to this script.
    pub fn matches_commitment(&self, recorded: &str) -> bool {
        let recorded = recorded.trim();
        let recorded = recorded.strip_prefix("0x").unwrap_or(recorded);
        recorded.eq_ignore_ascii_case(&self.script_pubkey_hex())
    }
}

/// Recompute a lock's script and check it against the recorded commitment.
pub fn verify_lock_commitment(lock: &Lock, network: Network) -> Result<LockScript, ScriptError> {
    let script = LockScript::for_lock(lock, network)?;
    if !script.matches_commitment(&lock.p2wsh_script_hash_hex) {
        return Err(ScriptError::CommitmentMismatch {
            recorded: lock.p2wsh_script_hash_hex.clone(),
            derived: script.script_pubkey_hex(),
        });
    }
    Ok(script)
}

/// Which branch of the lock script a spend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpendPath {
    /// Owner and custodian together
    Cooperative,
    /// Custodian alone, from `vault_claim_height`
    VaultClaim,
    /// Owner alone, from `open_claim_height`
    OwnerClaim,
}

impl SpendPath {
    pub const ALL: [SpendPath; 3] = [
        SpendPath::Cooperative,
        SpendPath::VaultClaim,
        SpendPath::OwnerClaim,
    ];

    /// The nLockTime a spend on this path sets.
    pub fn lock_time(&self, params: &LockScriptParams) -> BlockHeight {
        match self {
            SpendPath::Cooperative => params.created_at_height,
            SpendPath::VaultClaim => params.vault_claim_height,
            SpendPath::OwnerClaim => params.open_claim_height,
        }
    }

    /// Keys that must sign, in the order signatures are passed to [`SpendPath::witness`].
    pub fn required_keys(&self, params: &LockScriptParams) -> Vec<PublicKey> {
        match self {
            SpendPath::Cooperative => vec![params.vault_pubkey, params.owner_pubkey],
            SpendPath::VaultClaim => vec![params.vault_claim_pubkey],
            SpendPath::OwnerClaim => vec![params.owner_pubkey],
        }
    }

    /// Branch selectors, bottom to top, pushed after the signatures.
    fn selectors(&self) -> &'static [&'static [u8]] {
        match self {
            SpendPath::Cooperative => &[&[0x01]],
            SpendPath::VaultClaim => &[&[0x01], &[]],
            SpendPath::OwnerClaim => &[&[], &[]],
        }
    }

    /// Assemble the witness for this path.
    ///
    /// `signatures` are serialized ECDSA signatures (DER plus sighash byte),
    /// one per key of [`SpendPath::required_keys`] and in that order.
    pub fn witness(
        &self,
        signatures: &[Vec<u8>],
        witness_script: &Script,
    ) -> Result<Witness, ScriptError> {
        let expected = match self {
            SpendPath::Cooperative => 2,
            SpendPath::VaultClaim | SpendPath::OwnerClaim => 1,
        };
        if signatures.len() != expected {
            return Err(ScriptError::SignatureCount {
                expected,
                got: signatures.len(),
            });
        }

        let mut witness = Witness::new();
        // CHECKSIGVERIFY on the vault key runs first, so its signature sits on top
        for sig in signatures.iter().rev() {
            witness.push(sig);
        }
        for selector in self.selectors() {
            witness.push(selector);
        }
        witness.push(witness_script.as_bytes());
        Ok(witness)
    }
}

/// Identify the branch a confirmed spend of a lock output used.
///
/// Returns `None` when the witness does not have the shape of a lock spend.
pub fn classify_witness(witness: &Witness) -> Option<SpendPath> {
    let items: Vec<&[u8]> = witness.iter().collect();
    if items.len() != 4 {
        return None;
    }

    let looks_like_sig = |item: &[u8]| (9..=73).contains(&item.len());
    match (items[0], items[1], items[2]) {
        (owner, vault, [0x01]) if looks_like_sig(owner) && looks_like_sig(vault) => {
            Some(SpendPath::Cooperative)
        }
        (sig, [0x01], []) if looks_like_sig(sig) => Some(SpendPath::VaultClaim),
        (sig, [], []) if looks_like_sig(sig) => Some(SpendPath::OwnerClaim),
        _ => None,
    }
}
