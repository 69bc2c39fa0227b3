/*!
 * TPM key-file engine
 *
 * This crate reads, writes and operates on "TSS2 PRIVATE KEY" files: private
 * keys that live inside a TPM 2.0 and are persisted as DER/PEM blobs that
 * only the TPM can use.
 *
 * The main pieces are:
 *
 * - The key-file codec, a strict DER/PEM reader and writer for `TPMKey`
 * - TPM structure marshaling and the KDFa/KDFe key derivation functions
 * - The engine, which creates, imports, seals, loads and signs with keys
 *   through a [`Transport`](tpm::Transport) to a TPM
 *
 * Keys generated outside the TPM can be wrapped offline against a parent's
 * public area with the TPM duplication protocol, and imported the first time
 * they are used.
 */

/// Error types shared by every module
pub mod error;

/// Engine configuration
pub mod config;

/// TPM 2.0 structures, transport seam and key derivation
pub mod tpm;

/// The key-file model and its DER/PEM codec
pub mod keyfile;

/// Device-facing key operations
pub mod engine;

// Re-export main types for convenience
pub use config::{EngineConfig, TransientParentPolicy};
pub use engine::{ExternalKey, SignatureScheme, TpmConnection, TpmKeySigner};
pub use error::{KeyFileError, KeyFileResult};
pub use keyfile::{KeyAlgorithm, KeyOptions, KeyType, PublicKey, TpmKey};
pub use tpm::{HashAlgorithm, TpmHandle, Transport};

/// The types needed for everyday key-file work.
///
/// # Example
///
/// ```
/// use tpm_keyfile::prelude::*;
///
/// fn describe(pem: &[u8]) -> KeyFileResult<String> {
///     let key = TpmKey::from_pem(pem)?;
///     Ok(format!("{} key under parent {}", key.key_type(), key.parent()))
/// }
///
/// assert!(describe(b"not a key file").is_err());
/// ```
pub mod prelude {
    pub use crate::config::{EngineConfig, TransientParentPolicy};
    pub use crate::engine::{
        verify_signature, wrap_external_key, wrap_importable_key, AuthProvider, DuplicateBlob,
        EccPrivateKey, ExternalKey, KeyAuthProvider, SignatureScheme, TpmConnection, TpmKeySigner,
    };
    pub use crate::error::{KeyFileError, KeyFileResult};
    pub use crate::keyfile::{
        AuthPolicy, KeyAlgorithm, KeyOptions, KeyType, PublicKey, TpmKey, TpmPolicy, PEM_LABEL,
    };
    pub use crate::tpm::{
        Command, EccCurve, HashAlgorithm, Response, ResponseCode, Session, Signature, TpmHandle,
        Transport,
    };
}
