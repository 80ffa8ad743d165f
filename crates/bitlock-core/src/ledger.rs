//! External collaborators: the ledger and the Bitcoin node
//!
//! The cosigning core never performs I/O itself. It reads lock state through
//! [`LockLedger`] and reaches the Bitcoin network through [`BitcoinNode`].
//!
//! Release requests and funding references may be pruned from the ledger once
//! the custodian signature is recorded, so reads accept an optional historical
//! height. Callers treat current and historical reads identically.

use bitcoin::{Transaction, Txid};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

use crate::lock::{BlockHeight, CosignRecord, Lock, ReleaseRequest, UtxoRef};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Lock {0} not found")]
    LockNotFound(u64),

    #[error("A release request is already pending for lock {0}")]
    ReleaseAlreadyRequested(u64),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Node unavailable: {0}")]
    Unavailable(String),
}

/// Read and write access to lock records on the ledger.
pub trait LockLedger {
    fn lock(&self, utxo_id: u64) -> Result<Lock, LedgerError>;

    /// The release request for a lock, as of `at_height` when given.
    fn release_request(
        &self,
        utxo_id: u64,
        at_height: Option<BlockHeight>,
    ) -> Result<Option<ReleaseRequest>, LedgerError>;

    /// The funding reference for a lock, as of `at_height` when given.
    fn utxo_ref(
        &self,
        utxo_id: u64,
        at_height: Option<BlockHeight>,
    ) -> Result<Option<UtxoRef>, LedgerError>;

    fn submit_release_request(
        &self,
        utxo_id: u64,
        request: ReleaseRequest,
    ) -> Result<(), LedgerError>;

    fn submit_cosign(&self, utxo_id: u64, record: CosignRecord) -> Result<(), LedgerError>;

    fn cosign_record(&self, utxo_id: u64) -> Result<Option<CosignRecord>, LedgerError>;

    /// Drop the pending release request and custodian signature of a lock.
    ///
    /// A release whose signature no longer matches the funding reference
    /// starts over from a new request.
    fn clear_release(&self, utxo_id: u64) -> Result<(), LedgerError>;

    fn current_height(&self) -> Result<BlockHeight, LedgerError>;
}

/// Access to the Bitcoin network.
pub trait BitcoinNode {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, NodeError>;

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, NodeError>;

    fn tip_height(&self) -> Result<BlockHeight, NodeError>;
}

/// Release-related state of one lock at one ledger height.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    release_request: Option<ReleaseRequest>,
    utxo_ref: Option<UtxoRef>,
}

#[derive(Debug, Clone)]
struct LockEntry {
    lock: Lock,
    history: BTreeMap<BlockHeight, Snapshot>,
    cosign: Option<CosignRecord>,
}

impl LockEntry {
    fn at(&self, at_height: Option<BlockHeight>) -> Option<&Snapshot> {
        match at_height {
            Some(height) => self.history.range(..=height).next_back().map(|(_, s)| s),
            None => self.history.values().next_back(),
        }
    }

    /// Copy the latest snapshot forward to `height` and edit it there.
    fn edit_at(&mut self, height: BlockHeight) -> &mut Snapshot {
        let latest = self.history.values().next_back().cloned().unwrap_or_default();
        self.history.entry(height).or_insert(latest)
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    height: BlockHeight,
    locks: HashMap<u64, LockEntry>,
}

/// In-memory ledger keeping a height-indexed history of release state.
///
/// Used by tests and local tooling; mirrors the read semantics of a pruning
/// ledger that can still answer historical queries.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new(height: BlockHeight) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                height,
                locks: HashMap::new(),
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, LedgerError> {
        let state = self
            .state
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))?;
        Ok(f(&state))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))?;
        f(&mut state)
    }

    /// Record a new lock with its funding reference at the current height.
    pub fn insert_lock(&self, lock: Lock, utxo_ref: UtxoRef) -> Result<(), LedgerError> {
        self.write(|state| {
            let mut history = BTreeMap::new();
            history.insert(
                state.height,
                Snapshot {
                    release_request: None,
                    utxo_ref: Some(utxo_ref),
                },
            );
            state.locks.insert(
                lock.utxo_id,
                LockEntry {
                    lock,
                    history,
                    cosign: None,
                },
            );
            Ok(())
        })
    }

    /// Advance the ledger to `height`.
    ///
    /// Heights never go backwards: snapshots below the current height are final.
    pub fn set_height(&self, height: BlockHeight) -> Result<(), LedgerError> {
        self.write(|state| {
            if height < state.height {
                return Err(LedgerError::Unavailable(format!(
                    "height {} is below current height {}",
                    height, state.height
                )));
            }
            state.height = height;
            Ok(())
        })
    }

    /// Mark a lock's funding as confirmed, recording the funded amount.
    pub fn verify_lock(
        &self,
        utxo_id: u64,
        utxo_satoshis: Option<bitcoin::Amount>,
    ) -> Result<(), LedgerError> {
        self.write(|state| {
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            entry.lock.is_verified = true;
            if utxo_satoshis.is_some() {
                entry.lock.utxo_satoshis = utxo_satoshis;
            }
            Ok(())
        })
    }

    /// Point a lock at a different funding outpoint from the current height on.
    pub fn replace_utxo_ref(&self, utxo_id: u64, utxo_ref: UtxoRef) -> Result<(), LedgerError> {
        self.write(|state| {
            let height = state.height;
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            entry.edit_at(height).utxo_ref = Some(utxo_ref);
            Ok(())
        })
    }

    /// Drop the release request and funding reference from current state.
    ///
    /// Historical reads below the current height still see them.
    pub fn prune_release(&self, utxo_id: u64) -> Result<(), LedgerError> {
        self.write(|state| {
            let height = state.height;
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            let snapshot = entry.edit_at(height);
            snapshot.release_request = None;
            snapshot.utxo_ref = None;
            Ok(())
        })
    }
}

impl LockLedger for MemoryLedger {
    fn lock(&self, utxo_id: u64) -> Result<Lock, LedgerError> {
        self.read(|state| state.locks.get(&utxo_id).map(|e| e.lock.clone()))?
            .ok_or(LedgerError::LockNotFound(utxo_id))
    }

    fn release_request(
        &self,
        utxo_id: u64,
        at_height: Option<BlockHeight>,
    ) -> Result<Option<ReleaseRequest>, LedgerError> {
        self.read(|state| {
            state
                .locks
                .get(&utxo_id)
                .map(|e| e.at(at_height).and_then(|s| s.release_request.clone()))
        })?
        .ok_or(LedgerError::LockNotFound(utxo_id))
    }

    fn utxo_ref(
        &self,
        utxo_id: u64,
        at_height: Option<BlockHeight>,
    ) -> Result<Option<UtxoRef>, LedgerError> {
        self.read(|state| {
            state
                .locks
                .get(&utxo_id)
                .map(|e| e.at(at_height).and_then(|s| s.utxo_ref))
        })?
        .ok_or(LedgerError::LockNotFound(utxo_id))
    }

    fn submit_release_request(
        &self,
        utxo_id: u64,
        request: ReleaseRequest,
    ) -> Result<(), LedgerError> {
        self.write(|state| {
            let height = state.height;
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            if entry.at(None).is_some_and(|s| s.release_request.is_some()) {
                return Err(LedgerError::ReleaseAlreadyRequested(utxo_id));
            }
            entry.edit_at(height).release_request = Some(request);
            Ok(())
        })
    }

    fn submit_cosign(&self, utxo_id: u64, record: CosignRecord) -> Result<(), LedgerError> {
        self.write(|state| {
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            entry.cosign = Some(record);
            Ok(())
        })
    }

    fn cosign_record(&self, utxo_id: u64) -> Result<Option<CosignRecord>, LedgerError> {
        self.read(|state| state.locks.get(&utxo_id).map(|e| e.cosign.clone()))?
            .ok_or(LedgerError::LockNotFound(utxo_id))
    }

    fn clear_release(&self, utxo_id: u64) -> Result<(), LedgerError> {
        self.write(|state| {
            let height = state.height;
            let entry = state
                .locks
                .get_mut(&utxo_id)
                .ok_or(LedgerError::LockNotFound(utxo_id))?;
            entry.edit_at(height).release_request = None;
            entry.cosign = None;
            Ok(())
        })
    }

    fn current_height(&self) -> Result<BlockHeight, LedgerError> {
        self.read(|state| state.height)
    }
}
