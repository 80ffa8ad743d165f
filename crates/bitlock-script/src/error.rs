use bitcoin::Amount;
use thiserror::Error;

use crate::fee::MAX_FEE_RATE_SAT_VB;

/// Errors from lock script derivation, fee estimation and claim construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error(
        "Heights out of order: need created_at {created_at} < vault_claim {vault_claim} < open_claim {open_claim}"
    )]
    InvalidHeights {
        created_at: u32,
        vault_claim: u32,
        open_claim: u32,
    },

    #[error("{0} is not a block height")]
    InvalidHeight(u32),

    #[error("Key {0} is not compressed")]
    UncompressedKey(String),

    #[error("Fee rate {0} sat/vB outside 1..={MAX_FEE_RATE_SAT_VB} sat/vB")]
    InvalidFeeRate(u64),

    #[error("Output of {value} is dust (must exceed {threshold})")]
    DustOutput { value: Amount, threshold: Amount },

    #[error("Fee computation overflowed")]
    FeeOverflow,

    #[error("PSBT has no inputs or no outputs")]
    EmptyPsbt,

    #[error("Malformed PSBT: {0}")]
    MalformedPsbt(String),

    #[error("PSBT error: {0}")]
    Psbt(String),

    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    #[error("Lock commitment mismatch: recorded {recorded}, derived {derived}")]
    CommitmentMismatch { recorded: String, derived: String },

    #[error("Expected {expected} signatures, got {got}")]
    SignatureCount { expected: usize, got: usize },

    #[error("Secret key does not match {0}")]
    WrongKey(String),
}
