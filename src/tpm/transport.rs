/*!
 * TPM transport seam
 *
 * The engine talks to a TPM through the [`Transport`] trait. A transport
 * frames each [`Command`] into TPM wire format, runs the authorization
 * session described by the accompanying [`Session`] and returns the decoded
 * [`Response`] or the raw TPM response code.
 *
 * Sized-buffer fields (`private`, `duplicate`, `in_sym_seed`) carry the
 * buffer contents without their `u16` size prefix.
 */

use std::fmt;
use std::ops::Deref;

use zeroize::Zeroizing;

use crate::tpm::session::Session;
use crate::tpm::structures::{
    EccPoint, Public, SensitiveCreate, SigScheme, Signature, SymmetricObject, TpmAlgId, TpmHandle,
};

/// Secret byte string with a redacted `Debug` representation
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: &[u8]) -> Self {
        SecretBytes(Zeroizing::new(bytes.to_vec()))
    }

    pub fn into_inner(self) -> Zeroizing<Vec<u8>> {
        self.0
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        SecretBytes(Zeroizing::new(bytes))
    }
}

impl From<Zeroizing<Vec<u8>>> for SecretBytes {
    fn from(bytes: Zeroizing<Vec<u8>>) -> Self {
        SecretBytes(bytes)
    }
}

impl Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// An authorized entity: handle, name (for session HMACs) and auth value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHandle {
    pub handle: TpmHandle,
    pub name: Vec<u8>,
    pub auth: SecretBytes,
}

impl AuthHandle {
    pub fn new(handle: TpmHandle, name: Vec<u8>, auth: &[u8]) -> Self {
        AuthHandle {
            handle,
            name,
            auth: SecretBytes::new(auth),
        }
    }

    /// Permanent handles are named by their own handle value
    pub fn permanent(handle: TpmHandle, auth: &[u8]) -> Self {
        Self::new(handle, handle.value().to_be_bytes().to_vec(), auth)
    }
}

/// TPM response code (`TPM_RC`)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u32);

impl ResponseCode {
    pub const SUCCESS: ResponseCode = ResponseCode(0);
    /// `TPM_RC_INTEGRITY`
    pub const INTEGRITY: ResponseCode = ResponseCode(0x09F);
    /// `TPM_RC_COMMAND_CODE`
    pub const COMMAND_CODE: ResponseCode = ResponseCode(0x143);
    /// `TPM_RC_AUTH_FAIL`
    pub const AUTH_FAIL: ResponseCode = ResponseCode(0x08E);
    /// `TPM_RC_HANDLE`
    pub const HANDLE: ResponseCode = ResponseCode(0x08B);
    /// `TPM_RC_VALUE`
    pub const VALUE: ResponseCode = ResponseCode(0x084);

    pub fn value(self) -> u32 {
        self.0
    }

    fn is_format_one(self) -> bool {
        self.0 & 0x080 != 0
    }

    /// The error number with any handle/session/parameter index removed
    pub fn base(self) -> u32 {
        if self.is_format_one() {
            self.0 & 0x0BF
        } else {
            self.0
        }
    }

    /// Integrity check failure, regardless of which parameter it names
    pub fn is_integrity_failure(self) -> bool {
        self.is_format_one() && self.0 & 0x03F == 0x01F
    }
}

impl fmt::Debug for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseCode({:#x})", self.0)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Commands issued by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreatePrimary {
        hierarchy: AuthHandle,
        in_sensitive: SensitiveCreate,
        in_public: Public,
    },
    Create {
        parent: AuthHandle,
        in_sensitive: SensitiveCreate,
        in_public: Public,
    },
    Load {
        parent: AuthHandle,
        in_private: Vec<u8>,
        in_public: Public,
    },
    Import {
        parent: AuthHandle,
        encryption_key: Vec<u8>,
        object_public: Public,
        duplicate: Vec<u8>,
        in_sym_seed: Vec<u8>,
        symmetric: SymmetricObject,
    },
    Sign {
        key: AuthHandle,
        digest: Vec<u8>,
        scheme: SigScheme,
    },
    RsaDecrypt {
        key: AuthHandle,
        cipher_text: Vec<u8>,
        scheme: TpmAlgId,
        label: Vec<u8>,
    },
    Unseal {
        item: AuthHandle,
    },
    ObjectChangeAuth {
        object: AuthHandle,
        parent: TpmHandle,
        new_auth: SecretBytes,
    },
    EcdhZGen {
        key: AuthHandle,
        in_point: EccPoint,
    },
    ReadPublic {
        object: TpmHandle,
    },
    FlushContext {
        handle: TpmHandle,
    },
    /// `TPM2_GetCapability(TPM_CAP_ECC_CURVES)`
    GetEccCurves {
        property_count: u32,
    },
}

impl Command {
    /// TPM command name, used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreatePrimary { .. } => "TPM2_CreatePrimary",
            Command::Create { .. } => "TPM2_Create",
            Command::Load { .. } => "TPM2_Load",
            Command::Import { .. } => "TPM2_Import",
            Command::Sign { .. } => "TPM2_Sign",
            Command::RsaDecrypt { .. } => "TPM2_RSA_Decrypt",
            Command::Unseal { .. } => "TPM2_Unseal",
            Command::ObjectChangeAuth { .. } => "TPM2_ObjectChangeAuth",
            Command::EcdhZGen { .. } => "TPM2_ECDH_ZGen",
            Command::ReadPublic { .. } => "TPM2_ReadPublic",
            Command::FlushContext { .. } => "TPM2_FlushContext",
            Command::GetEccCurves { .. } => "TPM2_GetCapability",
        }
    }

    /// Handle the command primarily acts on, if any
    pub fn target(&self) -> Option<TpmHandle> {
        match self {
            Command::CreatePrimary { hierarchy, .. } => Some(hierarchy.handle),
            Command::Create { parent, .. }
            | Command::Load { parent, .. }
            | Command::Import { parent, .. } => Some(parent.handle),
            Command::Sign { key, .. }
            | Command::RsaDecrypt { key, .. }
            | Command::EcdhZGen { key, .. } => Some(key.handle),
            Command::Unseal { item } => Some(item.handle),
            Command::ObjectChangeAuth { object, .. } => Some(object.handle),
            Command::ReadPublic { object } => Some(*object),
            Command::FlushContext { handle } => Some(*handle),
            Command::GetEccCurves { .. } => None,
        }
    }
}

/// Decoded responses, one per [`Command`] variant
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    CreatePrimary {
        handle: TpmHandle,
        public: Public,
        name: Vec<u8>,
    },
    Create {
        private: Vec<u8>,
        public: Public,
    },
    Load {
        handle: TpmHandle,
        name: Vec<u8>,
    },
    Import {
        private: Vec<u8>,
    },
    Sign {
        signature: Signature,
    },
    RsaDecrypt {
        message: SecretBytes,
    },
    Unseal {
        data: SecretBytes,
    },
    ObjectChangeAuth {
        private: Vec<u8>,
    },
    EcdhZGen {
        point: EccPoint,
    },
    ReadPublic {
        public: Public,
        name: Vec<u8>,
    },
    FlushContext,
    /// Raw `TPM_ECC_CURVE` identifiers
    EccCurves {
        curves: Vec<u16>,
    },
}

/// A channel to a TPM
pub trait Transport {
    /// Execute one command, authorizing it with `session` when given and
    /// with password authorization otherwise
    fn execute(&mut self, command: &Command, session: Option<&Session>) -> Result<Response, ResponseCode>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn execute(&mut self, command: &Command, session: Option<&Session>) -> Result<Response, ResponseCode> {
        (**self).execute(command, session)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&mut self, command: &Command, session: Option<&Session>) -> Result<Response, ResponseCode> {
        (**self).execute(command, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_failure_detection() {
        assert!(ResponseCode::INTEGRITY.is_integrity_failure());
        assert!(ResponseCode(0x3DF).is_integrity_failure());
        assert!(!ResponseCode::AUTH_FAIL.is_integrity_failure());
        assert!(!ResponseCode(0x01F).is_integrity_failure());
        assert_eq!(ResponseCode(0x3DF).base(), 0x09F);
    }

    #[test]
    fn test_secret_bytes_debug_is_redacted() {
        let secret = SecretBytes::new(b"hunter2");
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("104"));

        let handle = AuthHandle::permanent(TpmHandle::OWNER, b"owner-password");
        assert_eq!(handle.name, vec![0x40, 0x00, 0x00, 0x01]);
        assert!(!format!("{:?}", handle).contains("owner-password"));
    }

    #[test]
    fn test_command_names_and_targets() {
        let flush = Command::FlushContext {
            handle: TpmHandle(0x8000_0001),
        };
        assert_eq!(flush.name(), "TPM2_FlushContext");
        assert_eq!(flush.target(), Some(TpmHandle(0x8000_0001)));

        let caps = Command::GetEccCurves { property_count: 100 };
        assert_eq!(caps.name(), "TPM2_GetCapability");
        assert_eq!(caps.target(), None);
    }
}
