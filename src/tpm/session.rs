//! HMAC authorization session descriptors.
//!
//! The engine does not compute session HMACs or encrypt parameters itself.
//! It describes the session it wants for each command and the transport
//! establishes it, salting it with the key named in [`SaltKey`].

use crate::tpm::structures::{HashAlgorithm, Public, SymmetricObject, TpmHandle};

/// Which command parameters are encrypted by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEncryption {
    /// First command parameter and first response parameter
    InOut,
    /// First command parameter only
    In,
    /// First response parameter only
    Out,
}

/// Key that encrypts the session salt
#[derive(Debug, Clone, PartialEq)]
pub struct SaltKey {
    pub handle: TpmHandle,
    pub public: Public,
}

/// Parameters of a salted, unbound HMAC session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub hash: HashAlgorithm,
    pub nonce_size: u16,
    pub symmetric: SymmetricObject,
    pub encryption: SessionEncryption,
    pub salt: Option<SaltKey>,
}

impl Session {
    pub fn hmac(encryption: SessionEncryption, nonce_size: u16, salt: Option<SaltKey>) -> Self {
        Session {
            hash: HashAlgorithm::Sha256,
            nonce_size,
            symmetric: SymmetricObject::aes_128_cfb(),
            encryption,
            salt,
        }
    }

    pub fn is_salted(&self) -> bool {
        self.salt.is_some()
    }

    pub fn encrypts_command(&self) -> bool {
        matches!(self.encryption, SessionEncryption::InOut | SessionEncryption::In)
    }

    pub fn encrypts_response(&self) -> bool {
        matches!(self.encryption, SessionEncryption::InOut | SessionEncryption::Out)
    }
}
