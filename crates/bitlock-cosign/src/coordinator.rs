//! Ledger-driven cosign coordinator
//!
//! Each party runs its own step against the ledger; nothing is kept between
//! calls. The owner requests a release, the custodian cosigns whenever it next
//! runs, the owner finishes and broadcasts whenever it next runs. Every step
//! re-reads the records it needs and rebuilds the skeleton from them.
//!
//! The custodian reads the release inputs as of the last completed ledger
//! height, which later writes cannot change, and records that height so the
//! owner can re-read the same inputs after pruning.
//!
//! Failures are returned to the caller as they are. Nothing here retries.

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{Network, OutPoint, Transaction};
use bitlock_core::config::CosignConfig;
use bitlock_core::{
    parse_destination, BitcoinNode, CosignRecord, LockLedger, ReleaseRequest, UtxoRef,
};
use bitlock_script::fee::output_after_fee;
use bitlock_script::{estimate_fee, verify_lock_commitment, ScriptError, MAX_FEE_RATE_SAT_VB};

use crate::derivation::verify_cosign_key;
use crate::error::{from_script, CosignError};
use crate::orphan::find_orphaned_outputs;
use crate::release::{
    build_release_skeleton, check_funding, finalize_release, vault_sign, FinalizedRelease,
};
use crate::state::ReleaseState;

/// Settings for a coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub network: Network,
    /// Highest fee rate a release request may use (sat/vB)
    pub max_fee_rate: u64,
    /// Rate charged for sweeping orphaned outputs (sat/vB)
    pub consolidation_fee_rate: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            max_fee_rate: MAX_FEE_RATE_SAT_VB,
            consolidation_fee_rate: 2,
        }
    }
}

impl CoordinatorConfig {
    /// Settings from a validated service config.
    ///
    /// `max_fee_rate` is clamped to [`MAX_FEE_RATE_SAT_VB`].
    pub fn from_config(config: &CosignConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            network: config.network()?,
            max_fee_rate: config.fees.max_fee_rate.min(MAX_FEE_RATE_SAT_VB),
            consolidation_fee_rate: config.fees.consolidation_fee_rate,
        })
    }
}

/// Runs the release steps for either party against a ledger and a node.
pub struct CosignCoordinator<L, N> {
    ledger: L,
    node: N,
    config: CoordinatorConfig,
    secp: Secp256k1<All>,
}

impl<L: LockLedger, N: BitcoinNode> CosignCoordinator<L, N> {
    pub fn new(ledger: L, node: N, config: CoordinatorConfig) -> Self {
        Self {
            ledger,
            node,
            config,
            secp: Secp256k1::new(),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    /// Owner step: ask for a cooperative release to `destination`.
    ///
    /// The fee is priced on the cooperative path at `fee_rate` sat/vB.
    pub fn request_release(
        &self,
        utxo_id: u64,
        destination: &str,
        fee_rate: u64,
    ) -> Result<ReleaseRequest, CosignError> {
        if fee_rate > self.config.max_fee_rate {
            return Err(ScriptError::InvalidFeeRate(fee_rate).into());
        }

        let lock = self.ledger.lock(utxo_id)?;
        if !lock.is_releasable() {
            return Err(CosignError::LockNotVerified(utxo_id));
        }
        let script = verify_lock_commitment(&lock, self.config.network).map_err(from_script)?;
        let to_script_pubkey = parse_destination(destination, self.config.network)?;

        let fee = estimate_fee(&script, fee_rate, &to_script_pubkey).map_err(from_script)?;
        output_after_fee(lock.funded_amount(), fee, &to_script_pubkey).map_err(from_script)?;

        if let Some(record) = self.ledger.cosign_record(utxo_id)? {
            if let Some(current) = self.moved_funding(utxo_id, &record)? {
                log::info!(
                    "Dropping release of lock {} signed over {}; funding is now {}",
                    utxo_id,
                    record.utxo_ref,
                    current
                );
                self.ledger.clear_release(utxo_id)?;
            }
        }

        let request = ReleaseRequest {
            to_script_pubkey,
            bitcoin_network_fee: fee,
        };
        self.ledger.submit_release_request(utxo_id, request.clone())?;
        log::info!(
            "Release requested for lock {} ({} fee at {} sat/vB)",
            utxo_id,
            fee,
            fee_rate
        );
        Ok(request)
    }

    /// Custodian step: verify everything and record a cosign signature.
    ///
    /// A request submitted at the current height is seen once the ledger has
    /// moved past it.
    pub fn vault_cosign(&self, utxo_id: u64, xpriv: &Xpriv) -> Result<CosignRecord, CosignError> {
        let settled = self.ledger.current_height()?.saturating_sub(1);
        let lock = self.ledger.lock(utxo_id)?;
        let request = self
            .ledger
            .release_request(utxo_id, Some(settled))?
            .ok_or(CosignError::ReleaseNotRequested(utxo_id))?;
        let utxo_ref = self.ledger.utxo_ref(utxo_id, Some(settled))?.ok_or_else(|| {
            CosignError::StaleReference(format!(
                "lock {} has no funding reference at height {}",
                utxo_id, settled
            ))
        })?;

        let skeleton = build_release_skeleton(&lock, &request, &utxo_ref, self.config.network)?;

        let funding = self.node.get_transaction(&utxo_ref.txid)?;
        check_funding(&skeleton, &funding)?;

        let key = verify_cosign_key(
            &self.secp,
            xpriv,
            &lock.vault_pubkey,
            &lock.vault_xpub_sources,
        )?;
        let record = vault_sign(&skeleton, &key, settled)?;

        self.ledger.submit_cosign(utxo_id, record.clone())?;
        log::info!(
            "Lock {} cosigned as of height {} over skeleton {}",
            utxo_id,
            settled,
            record.skeleton_txid
        );
        Ok(record)
    }

    /// Owner step: finish the release and broadcast it.
    ///
    /// `add_tx`, when given, is scanned for orphaned outputs paying the owner
    /// key; they are swept into the release.
    pub fn owner_cosign(
        &self,
        utxo_id: u64,
        owner_secret: &SecretKey,
        add_tx: Option<&Transaction>,
    ) -> Result<FinalizedRelease, CosignError> {
        let record = self
            .ledger
            .cosign_record(utxo_id)?
            .ok_or(CosignError::SignatureMissing(utxo_id))?;
        let lock = self.ledger.lock(utxo_id)?;

        if let Some(current) = self.moved_funding(utxo_id, &record)? {
            log::warn!(
                "Lock {} moved from {} to {} after cosigning",
                utxo_id,
                record.utxo_ref,
                current
            );
            self.ledger.clear_release(utxo_id)?;
            return Err(CosignError::StaleReference(format!(
                "funding moved from {} to {}; a new release request is required",
                record.utxo_ref, current
            )));
        }

        // Records may have been pruned since the custodian signed
        let at = Some(record.signed_at_height);
        let request = self
            .ledger
            .release_request(utxo_id, at)?
            .ok_or(CosignError::ReleaseNotRequested(utxo_id))?;
        let signed_ref = self.ledger.utxo_ref(utxo_id, at)?.ok_or_else(|| {
            CosignError::StaleReference(format!(
                "lock {} had no funding reference at height {}",
                utxo_id, record.signed_at_height
            ))
        })?;

        let skeleton = build_release_skeleton(&lock, &request, &signed_ref, self.config.network)?;

        let orphans = match add_tx {
            Some(tx) => {
                let lock_outpoint = signed_ref.outpoint();
                let found: Vec<_> = find_orphaned_outputs(tx, &lock.owner_pubkey)
                    .into_iter()
                    .filter(|o| o.outpoint != lock_outpoint)
                    .collect();
                log::debug!(
                    "Found {} orphaned output(s) for lock {} in {}",
                    found.len(),
                    utxo_id,
                    tx.compute_txid()
                );
                found
            }
            None => Vec::new(),
        };

        let release = finalize_release(
            &skeleton,
            &record,
            owner_secret,
            orphans,
            self.config.consolidation_fee_rate,
        )?;

        let txid = self.node.broadcast(&release.tx)?;
        log::info!(
            "Release of lock {} broadcast as {} ({} orphaned input(s))",
            utxo_id,
            txid,
            release
                .consolidation
                .as_ref()
                .map_or(0, |c| c.inputs.len())
        );
        Ok(release)
    }

    /// Where the lock stands according to the ledger.
    ///
    /// A signature over funding the lock has since moved away from does not
    /// count as cosigned.
    pub fn release_state(&self, utxo_id: u64) -> Result<ReleaseState, CosignError> {
        let request = self.ledger.release_request(utxo_id, None)?;
        let cosign = match self.ledger.cosign_record(utxo_id)? {
            Some(record) if self.moved_funding(utxo_id, &record)?.is_some() => None,
            other => other,
        };
        Ok(ReleaseState::from_records(request.as_ref(), cosign.as_ref()))
    }

    /// Terminal state reached by `spending_tx`, if it spends the lock.
    ///
    /// Checks the current funding reference first, then the one the custodian
    /// signed over.
    pub fn observe_spend(
        &self,
        utxo_id: u64,
        spending_tx: &Transaction,
    ) -> Result<Option<ReleaseState>, CosignError> {
        let mut watched: Vec<OutPoint> = Vec::new();
        if let Some(current) = self.ledger.utxo_ref(utxo_id, None)? {
            watched.push(current.outpoint());
        }
        if let Some(record) = self.ledger.cosign_record(utxo_id)? {
            let signed = record.utxo_ref.outpoint();
            if !watched.contains(&signed) {
                watched.push(signed);
            }
        }

        let state = watched
            .iter()
            .find_map(|outpoint| ReleaseState::from_spend(spending_tx, outpoint));
        if let Some(state) = &state {
            log::info!("Lock {} reached {:?}", utxo_id, state);
        }
        Ok(state)
    }

    /// The current funding reference, if it differs from the one `record`
    /// was signed over. A pruned reference is not a move.
    fn moved_funding(
        &self,
        utxo_id: u64,
        record: &CosignRecord,
    ) -> Result<Option<UtxoRef>, CosignError> {
        Ok(self
            .ledger
            .utxo_ref(utxo_id, None)?
            .filter(|current| *current != record.utxo_ref))
    }
}
