#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tpm_keyfile::tpm::{EccPoint, Public, Sensitive, Signature};

#[derive(Arbitrary, Debug)]
enum StructureInput {
    Public(Vec<u8>),
    Sensitive(Vec<u8>),
    EccPoint(Vec<u8>),
    Signature(Vec<u8>),
}

fuzz_target!(|input: StructureInput| {
    match input {
        StructureInput::Public(bytes) => {
            if let Ok(public) = Public::unmarshal(&bytes) {
                let _ = public.name();
                let _ = public.marshal();
            }
        }
        StructureInput::Sensitive(bytes) => {
            let _ = Sensitive::unmarshal_2b(&bytes);
        }
        StructureInput::EccPoint(bytes) => {
            let _ = EccPoint::unmarshal(&bytes);
        }
        StructureInput::Signature(bytes) => {
            let _ = Signature::unmarshal(&bytes);
        }
    }
});
