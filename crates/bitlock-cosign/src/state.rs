//! Release state derived from ledger records and on-chain spends.

use bitcoin::{OutPoint, Transaction, Txid};
use bitlock_core::{CosignRecord, ReleaseRequest};
use bitlock_script::{classify_witness, SpendPath};
use serde::{Deserialize, Serialize};

/// Where a lock stands in its release lifecycle.
///
/// ```text
/// Locked -> ReleaseRequested -> VaultCosigned -> OwnerCosignedAndBroadcast
///   \-> VaultClaimed
///   \-> OwnerClaimed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseState {
    Locked,
    ReleaseRequested,
    VaultCosigned,
    OwnerCosignedAndBroadcast { txid: Txid },
    VaultClaimed { txid: Txid },
    OwnerClaimed { txid: Txid },
}

impl ReleaseState {
    /// State implied by the ledger's release records.
    pub fn from_records(request: Option<&ReleaseRequest>, cosign: Option<&CosignRecord>) -> Self {
        match (request, cosign) {
            (_, Some(_)) => ReleaseState::VaultCosigned,
            (Some(_), None) => ReleaseState::ReleaseRequested,
            (None, None) => ReleaseState::Locked,
        }
    }

    /// Terminal state implied by `tx` spending `lock_outpoint`, if it does.
    pub fn from_spend(tx: &Transaction, lock_outpoint: &OutPoint) -> Option<Self> {
        let input = tx
            .input
            .iter()
            .find(|input| input.previous_output == *lock_outpoint)?;
        let txid = tx.compute_txid();
        match classify_witness(&input.witness)? {
            SpendPath::Cooperative => Some(ReleaseState::OwnerCosignedAndBroadcast { txid }),
            SpendPath::VaultClaim => Some(ReleaseState::VaultClaimed { txid }),
            SpendPath::OwnerClaim => Some(ReleaseState::OwnerClaimed { txid }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseState::OwnerCosignedAndBroadcast { .. }
                | ReleaseState::VaultClaimed { .. }
                | ReleaseState::OwnerClaimed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, ScriptBuf, TxIn, Witness};

    fn spend(outpoint: OutPoint, witness: Witness) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![
                TxIn::default(),
                TxIn {
                    previous_output: outpoint,
                    witness,
                    ..Default::default()
                },
            ],
            output: vec![],
        }
    }

    #[test]
    fn test_from_records() {
        let request = ReleaseRequest {
            to_script_pubkey: ScriptBuf::new(),
            bitcoin_network_fee: Amount::from_sat(500),
        };
        assert_eq!(ReleaseState::from_records(None, None), ReleaseState::Locked);
        assert_eq!(
            ReleaseState::from_records(Some(&request), None),
            ReleaseState::ReleaseRequested
        );
    }

    #[test]
    fn test_from_spend() {
        let outpoint = OutPoint::new(Txid::from_byte_array([3; 32]), 1);
        let script = vec![0x63; 40];

        let claim = Witness::from_slice(&[vec![0x30; 71], vec![], vec![], script.clone()]);
        let state = ReleaseState::from_spend(&spend(outpoint, claim), &outpoint).unwrap();
        assert!(matches!(state, ReleaseState::OwnerClaimed { .. }));
        assert!(state.is_terminal());

        let coop = Witness::from_slice(&[vec![0x30; 71], vec![0x30; 72], vec![1], script]);
        let state = ReleaseState::from_spend(&spend(outpoint, coop), &outpoint).unwrap();
        assert!(matches!(state, ReleaseState::OwnerCosignedAndBroadcast { .. }));

        let other = OutPoint::new(Txid::from_byte_array([4; 32]), 0);
        assert_eq!(
            ReleaseState::from_spend(&spend(outpoint, Witness::new()), &other),
            None
        );
        assert!(!ReleaseState::Locked.is_terminal());
    }

    #[test]
    fn test_state_json_roundtrip() {
        let txid = Txid::from_byte_array([7; 32]);
        let state = ReleaseState::VaultClaimed { txid };

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.starts_with(r#"{"VaultClaimed":{"txid":"#));
        assert!(json.contains(&txid.to_string()));

        let parsed: ReleaseState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);

        let locked: ReleaseState = serde_json::from_str(r#""Locked""#).unwrap();
        assert_eq!(locked, ReleaseState::Locked);
    }
}
