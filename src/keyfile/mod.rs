/*!
 * TSS2 PRIVATE KEY files
 *
 * The key model with its builder, and the DER/PEM codec that persists it.
 */

pub mod asn1;
pub mod key;

pub use asn1::PEM_LABEL;
pub use key::{AuthPolicy, KeyAlgorithm, KeyOptions, KeyType, PublicKey, TpmKey, TpmPolicy};
