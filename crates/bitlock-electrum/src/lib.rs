//! BitLock Electrum Client
//!
//! Bitcoin network access over the Electrum protocol:
//! - Funding discovery for lock scripts
//! - Block height monitoring (claim maturity)
//! - Transaction lookup and broadcast for the cosign flow
//!
//! [`ElectrumNode`] implements [`BitcoinNode`], so a cosign coordinator can
//! run against a live server.
//!
//! # Example
//!
//! ```ignore
//! use bitlock_electrum::ElectrumNode;
//! use bitcoin::Network;
//!
//! let node = ElectrumNode::new("ssl://electrum.blockstream.info:60002", Network::Bitcoin)?;
//! let height = node.get_height()?;
//! println!("Current block height: {}", height);
//! ```

use bitcoin::{Amount, Network, Script, ScriptBuf, Transaction, Txid};
use bitlock_core::config::CosignConfig;
use bitlock_core::{
    parse_network, AddressError, BitcoinNode, BlockHeight, Lock, NodeError, UtxoRef,
};
use electrum_client::{ElectrumApi, Error as ElectrumError};
use thiserror::Error;

pub use electrum_client::Client as RawClient;

/// Errors from Electrum operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Electrum protocol error: {0}")]
    Protocol(#[from] ElectrumError),

    #[error("Invalid network: {0}")]
    Network(#[from] AddressError),

    #[error("Transaction not found: {0}")]
    TxNotFound(Txid),

    #[error("Invalid lock script: {0}")]
    InvalidScript(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

impl From<Error> for NodeError {
    fn from(e: Error) -> Self {
        match e {
            Error::TxNotFound(txid) => NodeError::TxNotFound(txid),
            Error::BroadcastFailed(reason) => NodeError::BroadcastRejected(reason),
            other => NodeError::Unavailable(other.to_string()),
        }
    }
}

/// An output paying a lock script, as seen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingOutput {
    pub utxo_ref: UtxoRef,
    pub value: Amount,
    /// Confirmation height, 0 while unconfirmed
    pub height: BlockHeight,
}

/// Electrum-backed Bitcoin node
pub struct ElectrumNode {
    client: RawClient,
    network: Network,
}

impl ElectrumNode {
    /// Connect to `url`. Plaintext URLs are accepted but logged.
    pub fn new(url: &str, network: Network) -> Result<Self, Error> {
        if !url.starts_with("ssl://") && !url.contains("tls") {
            log::warn!("Connecting to Electrum without SSL - insecure for mainnet!");
        }

        let client =
            RawClient::new(url).map_err(|e: ElectrumError| Error::Connection(e.to_string()))?;
        log::debug!("Connected to Electrum server {} ({})", url, network);

        Ok(Self { client, network })
    }

    /// Connect using the `[bitcoin]` section of a service config.
    ///
    /// An empty `electrum_url` falls back to [`default_server`].
    pub fn from_config(config: &CosignConfig) -> Result<Self, Error> {
        let network = parse_network(&config.bitcoin.network)?;
        let url = match config.bitcoin.electrum_url.trim() {
            "" => default_server(network),
            url => url,
        };
        Self::new(url, network)
    }

    pub fn get_height(&self) -> Result<BlockHeight, Error> {
        let header = self.client.block_headers_subscribe()?;
        Ok(header.height as BlockHeight)
    }

    /// Unspent outputs paying `script_pubkey`, oldest confirmation first.
    pub fn find_funding(&self, script_pubkey: &Script) -> Result<Vec<FundingOutput>, Error> {
        let mut outputs: Vec<FundingOutput> = self
            .client
            .script_list_unspent(script_pubkey)?
            .into_iter()
            .map(|u| FundingOutput {
                utxo_ref: UtxoRef::new(u.tx_hash, u.tx_pos as u32),
                value: Amount::from_sat(u.value),
                height: u.height as BlockHeight,
            })
            .collect();

        // Unconfirmed (height 0) sort last
        outputs.sort_by_key(|o| (o.height == 0, o.height));
        Ok(outputs)
    }

    /// Funding output of `lock`: the unspent output paying its committed
    /// script with the funded amount, confirmed outputs first.
    pub fn locate_funding(&self, lock: &Lock) -> Result<Option<FundingOutput>, Error> {
        let hex = lock.p2wsh_script_hash_hex.trim_start_matches("0x");
        let script_pubkey =
            ScriptBuf::from_hex(hex).map_err(|e| Error::InvalidScript(e.to_string()))?;
        let outputs = self.find_funding(&script_pubkey)?;

        let found = select_funding(&outputs, lock.funded_amount());
        match &found {
            Some(output) => log::debug!("Lock {} funded by {}", lock.utxo_id, output.utxo_ref),
            None => log::debug!(
                "No output of {} for lock {} among {} candidate(s)",
                lock.funded_amount(),
                lock.utxo_id,
                outputs.len()
            ),
        }
        Ok(found)
    }

    /// Server-side errors mean the transaction is unknown; anything else is a
    /// transport failure.
    pub fn get_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        match self.client.transaction_get(txid) {
            Ok(tx) => Ok(tx),
            Err(ElectrumError::Protocol(_)) => Err(Error::TxNotFound(*txid)),
            Err(e) => Err(Error::Protocol(e)),
        }
    }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid, Error> {
        let txid = self
            .client
            .transaction_broadcast(tx)
            .map_err(|e: ElectrumError| Error::BroadcastFailed(e.to_string()))?;
        log::info!("Broadcast {}", txid);
        Ok(txid)
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

impl BitcoinNode for ElectrumNode {
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, NodeError> {
        Ok(ElectrumNode::get_transaction(self, txid)?)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, NodeError> {
        Ok(ElectrumNode::broadcast(self, tx)?)
    }

    fn tip_height(&self) -> Result<BlockHeight, NodeError> {
        Ok(self.get_height()?)
    }
}

/// First output carrying exactly `expected`, in the order given.
pub fn select_funding(outputs: &[FundingOutput], expected: Amount) -> Option<FundingOutput> {
    outputs.iter().find(|o| o.value == expected).copied()
}

/// Default Electrum servers for each network
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "ssl://electrum.blockstream.info:60002",
        Network::Testnet => "ssl://electrum.blockstream.info:60004",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_default_servers() {
        assert!(default_server(Network::Bitcoin).contains("60002"));
        assert!(default_server(Network::Testnet).contains("60004"));
        assert!(default_server(Network::Regtest).starts_with("tcp://127.0.0.1"));
    }

    #[test]
    fn test_node_error_mapping() {
        let txid = Txid::from_byte_array([9; 32]);
        assert!(matches!(
            NodeError::from(Error::TxNotFound(txid)),
            NodeError::TxNotFound(t) if t == txid
        ));
        assert!(matches!(
            NodeError::from(Error::BroadcastFailed("min relay fee not met".into())),
            NodeError::BroadcastRejected(_)
        ));
        assert!(matches!(
            NodeError::from(Error::Connection("refused".into())),
            NodeError::Unavailable(_)
        ));
        // Transport failures are not missing transactions
        assert!(matches!(
            NodeError::from(Error::Protocol(ElectrumError::Message("connection reset".into()))),
            NodeError::Unavailable(_)
        ));
    }

    fn output(byte: u8, sats: u64, height: BlockHeight) -> FundingOutput {
        FundingOutput {
            utxo_ref: UtxoRef::new(Txid::from_byte_array([byte; 32]), 0),
            value: Amount::from_sat(sats),
            height,
        }
    }

    #[test]
    fn test_select_funding_by_amount() {
        let outputs = [
            output(1, 1_000, 850_000),
            output(2, 50_000, 850_010),
            output(3, 50_000, 0),
        ];
        let found = select_funding(&outputs, Amount::from_sat(50_000)).unwrap();
        assert_eq!(found.utxo_ref.txid, Txid::from_byte_array([2; 32]));

        assert_eq!(select_funding(&outputs, Amount::from_sat(49_999)), None);
        assert_eq!(select_funding(&[], Amount::from_sat(1_000)), None);
    }

    #[test]
    fn test_from_config_rejects_bad_network() {
        let mut config = CosignConfig::default();
        config.bitcoin.network = "moonnet".into();
        assert!(matches!(
            ElectrumNode::from_config(&config),
            Err(Error::Network(_))
        ));
    }

    // Run with: cargo test --package bitlock-electrum -- --ignored

    #[test]
    #[ignore = "requires network access"]
    fn test_get_height_mainnet() {
        let node = ElectrumNode::new(default_server(Network::Bitcoin), Network::Bitcoin).unwrap();
        let height = node.get_height().unwrap();
        assert!(height > 800_000);
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_get_height_testnet() {
        let node = ElectrumNode::new(default_server(Network::Testnet), Network::Testnet).unwrap();
        assert!(node.get_height().unwrap() > 0);
    }
}
