#![no_main]

use libfuzzer_sys::fuzz_target;
use bitlock_script::decode_psbt;
use bitlock_script::psbt::decode_psbt_bytes;

fuzz_target!(|data: &[u8]| {
    // Raw bytes go straight to the binary decoder; UTF-8 input also goes
    // through the hex/base64 front end. Neither may panic.
    let _ = decode_psbt_bytes(data);
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(psbt) = decode_psbt(s) {
            assert!(!psbt.unsigned_tx.input.is_empty());
            assert!(!psbt.unsigned_tx.output.is_empty());
        }
    }
});
