/*!
 * TPM engine
 *
 * Device-facing operations on key files. Everything runs through a
 * [`TpmConnection`], which owns the transport and scopes every transient
 * handle it creates.
 *
 * - `parent`: resolving a key file's parent into a usable storage key
 * - `create`: device-generated loadable keys
 * - `import`: offline duplication wrap and `TPM2_Import`
 * - `sealed`: sealing and unsealing small secrets
 * - `sign`: signing, scheme selection and local verification
 * - `ecdh`: P-256 key agreement
 * - `auth`: changing a key's auth value
 * - `signer`: a thread-safe signer bound to one key
 */

pub mod auth;
pub mod connection;
pub mod create;
pub mod ecdh;
pub mod import;
pub mod parent;
pub mod sealed;
pub mod sign;
pub mod signer;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::TpmConnection;
pub use create::{ecc_template, rsa_template, RSA_KEY_BITS};
pub use import::{wrap_external_key, wrap_importable_key, DuplicateBlob, EccPrivateKey, ExternalKey};
pub use parent::{srk_template, ResolvedParent};
pub use sealed::{sealed_template, MAX_SEALED_DATA};
pub use sign::{
    check_digest, emsa_pkcs1_v15, encode_signature_asn1, select_scheme, verify_signature,
    SignatureScheme,
};
pub use signer::{AuthProvider, KeyAuthProvider, TpmKeySigner};
