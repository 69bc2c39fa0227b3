/*!
 * TPM 2.0 building blocks
 *
 * Wire structures, the transport seam, session descriptors and the TPM key
 * derivation functions used by the duplication protocol.
 */

pub mod kdf;
pub mod session;
pub mod structures;
pub mod transport;

pub use session::{SaltKey, Session, SessionEncryption};
pub use structures::{
    EccCurve, EccPoint, HandleType, HashAlgorithm, Public, PublicDetail, Sensitive,
    SensitiveComposite, SensitiveCreate, SigScheme, Signature, SymmetricObject, TpmAlgId,
    TpmHandle, TpmaObject,
};
pub use transport::{AuthHandle, Command, Response, ResponseCode, SecretBytes, Transport};
