#![no_main]

use bitcoin::Network;
use bitlock_core::{address_for_script, parse_destination};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        for network in [Network::Bitcoin, Network::Testnet, Network::Regtest] {
            if let Ok(script) = parse_destination(s, network) {
                let _ = address_for_script(&script, network);
            }
        }
    }
});
