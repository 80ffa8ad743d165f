//! BitLock Core
//!
//! Shared data model for Bitcoin collateral locks.
//!
//! # Concepts
//!
//! - **Lock**: a P2WSH output committing to three keys and three heights
//! - **Cooperative release**: owner and custodian sign together at any time
//! - **Unilateral claim**: custodian after `vault_claim_height`, owner after
//!   `open_claim_height`
//!
//! The ledger holding lock records and the Bitcoin node are collaborators
//! reached through the traits in [`ledger`].

pub mod address;
pub mod config;
pub mod ledger;
pub mod lock;

pub use address::{address_for_script, parse_destination, parse_network, AddressError};
pub use ledger::{BitcoinNode, LedgerError, LockLedger, MemoryLedger, NodeError};
pub use lock::{BlockHeight, CosignRecord, Lock, ReleaseRequest, UtxoRef, XpubSources};
