// Shared fixtures for the integration tests
#![allow(dead_code)]

pub mod soft_tpm;

use sha2::{Digest, Sha256};

use tpm_keyfile::TpmConnection;

pub use soft_tpm::{SoftTpm, RC_INTEGRITY_DUPLICATE};

pub const OWNER_AUTH: &[u8] = b"owner-secret";

/// A connection to a fresh software TPM
pub fn connection() -> TpmConnection<SoftTpm> {
    TpmConnection::new(SoftTpm::new(OWNER_AUTH))
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}
