use bitcoin::Amount;
use bitlock_core::{AddressError, LedgerError, NodeError};
use bitlock_script::ScriptError;
use thiserror::Error;

/// Which derivation check rejected a custodian key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyMismatch {
    #[error("fingerprint {actual} does not match recorded {expected}")]
    Fingerprint { expected: String, actual: String },

    #[error("child {index} derives {derived}, lock records {recorded}")]
    ChildKey {
        index: u32,
        derived: String,
        recorded: String,
    },

    #[error("index {0} is hardened")]
    HardenedIndex(u32),

    #[error("derivation failed: {0}")]
    Derivation(String),
}

/// The check a failed cosigning step tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedCheck {
    Construction,
    Derivation,
    Signature,
    Staleness,
    Dust,
    Ledger,
    Network,
}

/// Errors from the cosigning ceremony.
#[derive(Error, Debug)]
pub enum CosignError {
    #[error("Construction failed: {0}")]
    Construction(#[from] ScriptError),

    #[error("Invalid destination: {0}")]
    Destination(#[from] AddressError),

    #[error("Custodian key mismatch: {0}")]
    KeyMismatch(#[from] KeyMismatch),

    #[error("No custodian signature recorded for lock {0}")]
    SignatureMissing(u64),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("Release output of {value} is dust (must exceed {threshold})")]
    DustOutput { value: Amount, threshold: Amount },

    #[error("Lock {0} funding is not verified")]
    LockNotVerified(u64),

    #[error("No release request for lock {0}")]
    ReleaseNotRequested(u64),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),
}

impl CosignError {
    /// Name the check that failed.
    pub fn failed_check(&self) -> FailedCheck {
        match self {
            CosignError::Construction(ScriptError::DustOutput { .. })
            | CosignError::DustOutput { .. } => FailedCheck::Dust,
            CosignError::Construction(_)
            | CosignError::Destination(_)
            | CosignError::LockNotVerified(_)
            | CosignError::ReleaseNotRequested(_) => FailedCheck::Construction,
            CosignError::KeyMismatch(_) => FailedCheck::Derivation,
            CosignError::SignatureMissing(_) | CosignError::SignatureInvalid(_) => {
                FailedCheck::Signature
            }
            CosignError::StaleReference(_) => FailedCheck::Staleness,
            CosignError::Ledger(_) => FailedCheck::Ledger,
            CosignError::Node(_) => FailedCheck::Network,
        }
    }
}

/// Lift dust from a construction failure into its own variant.
pub(crate) fn from_script(e: ScriptError) -> CosignError {
    match e {
        ScriptError::DustOutput { value, threshold } => CosignError::DustOutput { value, threshold },
        other => CosignError::Construction(other),
    }
}
