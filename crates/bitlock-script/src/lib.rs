//! BitLock Script
//!
//! Derivation of the collateral lock script and everything that spends it
//! without a counterparty: fee estimation, unilateral claims and PSBT
//! interchange.
//!
//! # Spend paths
//!
//! - **Cooperative**: custodian + owner, from `created_at_height`
//! - **Vault claim**: custodian claim key, from `vault_claim_height`
//! - **Owner claim**: owner key, from `open_claim_height`

pub mod claim;
pub mod error;
pub mod fee;
pub mod psbt;
pub mod script;
pub mod sign;

#[cfg(test)]
mod test_utils;

pub use claim::{build_claim_psbt, sign_claim, ClaimPath, ClaimPsbt};
pub use error::ScriptError;
pub use fee::{
    estimate_fee, estimate_path_vsize, release_output, ReleaseOutput, MAX_FEE_RATE_SAT_VB,
};
pub use psbt::{decode_psbt, encode_psbt_base64, encode_psbt_hex};
pub use script::{
    classify_witness, derive_script, verify_lock_commitment, LockScript, LockScriptParams,
    SpendPath,
};
