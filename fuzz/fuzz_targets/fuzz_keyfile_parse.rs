#![no_main]

use libfuzzer_sys::fuzz_target;
use tpm_keyfile::TpmKey;

fuzz_target!(|data: &[u8]| {
    // Anything that parses must re-encode to the same key
    if let Ok(key) = TpmKey::from_der(data) {
        let der = key.to_der().expect("parsed key re-encodes");
        assert_eq!(TpmKey::from_der(&der).expect("re-encoded key parses"), key);
        let _ = key.public_key();
    }
    let _ = TpmKey::from_pem(data);
});
