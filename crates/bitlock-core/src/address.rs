//! Address and script encoding across networks
//!
//! Destinations arrive either as addresses for a specific network or as raw
//! scriptPubkey hex. A string made only of hex digits carries no network prefix,
//! so it is treated as a raw script and passed through untouched behind a `0x`
//! marker rather than being parsed as an address.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, Script, ScriptBuf};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Empty destination")]
    Empty,

    #[error("Invalid script hex: {0}")]
    InvalidHex(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address {address} is not valid for {network}")]
    WrongNetwork { address: String, network: Network },
}

/// Parse a network name.
///
/// Accepts `bitcoin`/`mainnet`, `testnet`/`testnet3`, `signet` and `regtest`.
pub fn parse_network(s: &str) -> Result<Network, AddressError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
        "testnet" | "testnet3" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(AddressError::UnknownNetwork(other.to_string())),
    }
}

/// True if `s` is non-empty and made only of hex digits.
pub fn is_raw_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Resolve a destination string into a scriptPubkey.
///
/// `s` may be an address valid for `network`, `0x`-prefixed script hex, or bare
/// script hex.
pub fn parse_destination(s: &str, network: Network) -> Result<ScriptBuf, AddressError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(AddressError::Empty);
    }

    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    if is_raw_hex(hex_part) {
        let bytes = hex::decode(hex_part).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        return Ok(ScriptBuf::from_bytes(bytes));
    }

    let unchecked: Address<NetworkUnchecked> = s
        .parse()
        .map_err(|e: bitcoin::address::ParseError| AddressError::InvalidAddress(e.to_string()))?;
    let address = unchecked
        .require_network(network)
        .map_err(|_| AddressError::WrongNetwork {
            address: s.to_string(),
            network,
        })?;

    Ok(address.script_pubkey())
}

/// Render a destination as `0x`-prefixed scriptPubkey hex.
///
/// Raw hex input is passed through unmodified (only the marker is added).
pub fn script_pubkey_hex(s: &str, network: Network) -> Result<String, AddressError> {
    let trimmed = s.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if is_raw_hex(hex_part) {
        return Ok(format!("0x{}", hex_part));
    }
    let script = parse_destination(trimmed, network)?;
    Ok(format!("0x{}", script.to_hex_string()))
}

/// The address for `script` on `network`, if the script has a standard address form.
pub fn address_for_script(script: &Script, network: Network) -> Option<Address> {
    Address::from_script(script, network).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::WScriptHash;

    fn sample_wsh() -> ScriptBuf {
        ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array([0x11; 32]))
    }

    #[test]
    fn test_parse_network_names() {
        assert_eq!(parse_network("bitcoin").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("mainnet").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("Testnet").unwrap(), Network::Testnet);
        assert_eq!(parse_network("signet").unwrap(), Network::Signet);
        assert_eq!(parse_network("regtest").unwrap(), Network::Regtest);
        assert!(matches!(
            parse_network("liquid"),
            Err(AddressError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn test_address_roundtrip_all_networks() {
        let script = sample_wsh();
        for network in [
            Network::Bitcoin,
            Network::Testnet,
            Network::Signet,
            Network::Regtest,
        ] {
            let address = address_for_script(&script, network).unwrap();
            let parsed = parse_destination(&address.to_string(), network).unwrap();
            assert_eq!(parsed, script, "roundtrip failed on {}", network);
        }
    }

    #[test]
    fn test_network_prefixes_differ() {
        let script = sample_wsh();
        let main = address_for_script(&script, Network::Bitcoin).unwrap().to_string();
        let test = address_for_script(&script, Network::Testnet).unwrap().to_string();
        let reg = address_for_script(&script, Network::Regtest).unwrap().to_string();

        assert!(main.starts_with("bc1q"));
        assert!(test.starts_with("tb1q"));
        assert!(reg.starts_with("bcrt1q"));
    }

    #[test]
    fn test_wrong_network_rejected() {
        let script = sample_wsh();
        let main = address_for_script(&script, Network::Bitcoin).unwrap().to_string();
        let result = parse_destination(&main, Network::Testnet);
        assert!(matches!(result, Err(AddressError::WrongNetwork { .. })));
    }

    #[test]
    fn test_raw_hex_passthrough() {
        let raw = "0014aabbccddeeff00112233445566778899aabbccdd";
        assert_eq!(
            script_pubkey_hex(raw, Network::Bitcoin).unwrap(),
            format!("0x{}", raw)
        );
        // Already-marked hex is not double prefixed
        assert_eq!(
            script_pubkey_hex(&format!("0x{}", raw), Network::Bitcoin).unwrap(),
            format!("0x{}", raw)
        );

        let script = parse_destination(raw, Network::Signet).unwrap();
        assert_eq!(script.to_hex_string(), raw);
    }

    #[test]
    fn test_address_to_script_hex() {
        let script = sample_wsh();
        let address = address_for_script(&script, Network::Signet).unwrap();
        let hex = script_pubkey_hex(&address.to_string(), Network::Signet).unwrap();
        assert_eq!(hex, format!("0x{}", script.to_hex_string()));
    }

    #[test]
    fn test_invalid_destinations() {
        assert_eq!(parse_destination("  ", Network::Bitcoin), Err(AddressError::Empty));
        assert!(matches!(
            parse_destination("abc", Network::Bitcoin),
            Err(AddressError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_destination("not-an-address", Network::Bitcoin),
            Err(AddressError::InvalidAddress(_))
        ));
    }
}
