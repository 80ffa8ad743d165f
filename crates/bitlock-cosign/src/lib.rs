//! # BitLock Cosign
//!
//! Two-party release of Bitcoin collateral without a live session.
//!
//! The owner and the custodian never talk directly. Each reads the ledger,
//! does its step and writes the result back:
//!
//! 1. Owner submits a release request (destination + fee)
//! 2. Custodian proves its key derivation, signs and records the signature
//! 3. Owner verifies the signature, adds its own and broadcasts
//!
//! The unsigned transaction is re-derived from ledger records at every step.

pub mod coordinator;
pub mod derivation;
pub mod error;
pub mod orphan;
pub mod release;
pub mod state;

pub use coordinator::{CoordinatorConfig, CosignCoordinator};
pub use derivation::{cosign_commitment, verify_cosign_key, verify_cosign_xpub, CosignKey};
pub use error::{CosignError, FailedCheck, KeyMismatch};
pub use orphan::{find_orphaned_outputs, OrphanedOutput, OwnerEncoding};
pub use release::{
    build_release_skeleton, check_funding, finalize_release, vault_sign, FinalizedRelease,
    ReleaseSkeleton,
};
pub use state::ReleaseState;
