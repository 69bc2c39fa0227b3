/*!
 * TSS2 key model
 *
 * [`TpmKey`] is the in-memory form of a `TSS2 PRIVATE KEY` file. It carries
 * the TPM public and private blobs, the parent handle they were created under
 * and the optional policy metadata. Keys are built through [`KeyOptions`] or
 * the factory operations on [`TpmConnection`](crate::engine::TpmConnection)
 * and are never partially constructed.
 */

use std::fmt;

use der::asn1::ObjectIdentifier;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::BigUint;
use zeroize::Zeroizing;

use crate::error::{KeyFileError, KeyFileResult};
use crate::tpm::structures::{EccCurve, Public, PublicDetail, TpmHandle};

/// OID of a key loadable with `TPM2_Load`
pub const OID_LOADABLE_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.10.1.3");
/// OID of a duplicated key that must go through `TPM2_Import`
pub const OID_IMPORTABLE_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.10.1.4");
/// OID of a sealed data object
pub const OID_SEALED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.10.1.5");
/// OID used by key files written before the 2.23.133.10.1 arc
pub const OID_LEGACY_LOADABLE_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.23.133.10.2");

/// RSA public exponent encoded as zero in TPM public areas
pub(crate) const DEFAULT_RSA_EXPONENT: u32 = 65537;

/// Kind of key stored in a key file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Loadable,
    Importable,
    Sealed,
    LegacyLoadable,
}

impl KeyType {
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            KeyType::Loadable => OID_LOADABLE_KEY,
            KeyType::Importable => OID_IMPORTABLE_KEY,
            KeyType::Sealed => OID_SEALED_DATA,
            KeyType::LegacyLoadable => OID_LEGACY_LOADABLE_KEY,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> KeyFileResult<Self> {
        [
            KeyType::Loadable,
            KeyType::Importable,
            KeyType::Sealed,
            KeyType::LegacyLoadable,
        ]
        .into_iter()
        .find(|kind| kind.oid() == *oid)
        .ok_or_else(|| KeyFileError::UnknownKeyType {
            oid: oid.to_string(),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            KeyType::Loadable => "loadable",
            KeyType::Importable => "importable",
            KeyType::Sealed => "sealed",
            KeyType::LegacyLoadable => "legacy loadable",
        }
    }

    /// Whether `TPM2_Load` accepts the key's private blob as-is
    pub fn is_loadable(self) -> bool {
        matches!(self, KeyType::Loadable | KeyType::LegacyLoadable)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Asymmetric algorithm of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Ecc,
    Rsa,
}

impl KeyAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Ecc => "ECC",
            KeyAlgorithm::Rsa => "RSA",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A policy command and its opaque parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TpmPolicy {
    pub command_code: u32,
    pub command_policy: Vec<u8>,
}

/// A named alternative policy branch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthPolicy {
    pub name: Option<String>,
    pub policy: Vec<TpmPolicy>,
}

/// Public key recovered from a TPM public area
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
    Rsa(rsa::RsaPublicKey),
}

impl PublicKey {
    pub fn from_public(public: &Public) -> KeyFileResult<Self> {
        let invalid = |e: &dyn fmt::Display| KeyFileError::crypto_failure("public key decoding", &e.to_string());
        match &public.detail {
            PublicDetail::Ecc { curve, point, .. } => {
                let sec1 = point.to_sec1(*curve)?;
                match curve {
                    EccCurve::NistP256 => p256::PublicKey::from_sec1_bytes(&sec1)
                        .map(PublicKey::P256)
                        .map_err(|e| invalid(&e)),
                    EccCurve::NistP384 => p384::PublicKey::from_sec1_bytes(&sec1)
                        .map(PublicKey::P384)
                        .map_err(|e| invalid(&e)),
                    EccCurve::NistP521 => p521::PublicKey::from_sec1_bytes(&sec1)
                        .map(PublicKey::P521)
                        .map_err(|e| invalid(&e)),
                }
            }
            PublicDetail::Rsa {
                exponent, modulus, ..
            } => {
                let exponent = if *exponent == 0 {
                    DEFAULT_RSA_EXPONENT
                } else {
                    *exponent
                };
                rsa::RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from(exponent))
                    .map(PublicKey::Rsa)
                    .map_err(|e| invalid(&e))
            }
            PublicDetail::KeyedHash { .. } => Err(KeyFileError::WrongKeyType {
                operation: "public key".to_string(),
                expected: "RSA or ECC".to_string(),
                actual: public.type_name().to_string(),
            }),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Rsa(_) => KeyAlgorithm::Rsa,
            _ => KeyAlgorithm::Ecc,
        }
    }

    /// Uncompressed SEC1 point for EC keys
    pub fn to_sec1(&self) -> Option<Vec<u8>> {
        match self {
            PublicKey::P256(key) => Some(key.to_encoded_point(false).as_bytes().to_vec()),
            PublicKey::P384(key) => Some(key.to_encoded_point(false).as_bytes().to_vec()),
            PublicKey::P521(key) => Some(key.to_encoded_point(false).as_bytes().to_vec()),
            PublicKey::Rsa(_) => None,
        }
    }
}

/// A TSS2 key file
#[derive(Clone)]
pub struct TpmKey {
    pub(crate) key_type: KeyType,
    pub(crate) empty_auth: bool,
    pub(crate) policy: Vec<TpmPolicy>,
    pub(crate) secret: Vec<u8>,
    pub(crate) auth_policy: Vec<AuthPolicy>,
    pub(crate) description: Option<String>,
    pub(crate) parent: TpmHandle,
    pub(crate) pubkey: Vec<u8>,
    pub(crate) privkey: Vec<u8>,
    pub(crate) user_auth: Zeroizing<Vec<u8>>,
}

impl TpmKey {
    /// Default value every builder starts from
    pub(crate) fn blank() -> Self {
        TpmKey {
            key_type: KeyType::Loadable,
            empty_auth: true,
            policy: Vec::new(),
            secret: Vec::new(),
            auth_policy: Vec::new(),
            description: None,
            parent: TpmHandle::OWNER,
            pubkey: Vec::new(),
            privkey: Vec::new(),
            user_auth: Zeroizing::new(Vec::new()),
        }
    }

    /// Build a key from public/private blobs produced by a TPM or a wrapper
    pub fn from_device_blobs(
        key_type: KeyType,
        pubkey: Vec<u8>,
        privkey: Vec<u8>,
        options: KeyOptions,
    ) -> KeyFileResult<Self> {
        let mut key = options.apply(TpmKey::blank());
        key.key_type = key_type;
        key.pubkey = pubkey;
        key.privkey = privkey;
        key.validate_local()?;
        Ok(key)
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn empty_auth(&self) -> bool {
        self.empty_auth
    }

    pub fn policy(&self) -> &[TpmPolicy] {
        &self.policy
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn auth_policy(&self) -> &[AuthPolicy] {
        &self.auth_policy
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parent(&self) -> TpmHandle {
        self.parent
    }

    /// Marshaled `TPM2B_PUBLIC`
    pub fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    /// Marshaled `TPM2B_PRIVATE`
    pub fn privkey(&self) -> &[u8] {
        &self.privkey
    }

    /// Auth value the key was built with; empty for parsed keys
    pub fn user_auth(&self) -> &[u8] {
        &self.user_auth
    }

    /// Parsed public area
    pub fn public(&self) -> KeyFileResult<Public> {
        Public::unmarshal_2b(&self.pubkey)
    }

    /// Whether the public area carries the sign attribute
    pub fn has_signer(&self) -> bool {
        self.public().map(|public| public.can_sign()).unwrap_or(false)
    }

    pub fn key_algorithm(&self) -> KeyFileResult<KeyAlgorithm> {
        let public = self.public()?;
        match public.detail {
            PublicDetail::Ecc { .. } => Ok(KeyAlgorithm::Ecc),
            PublicDetail::Rsa { .. } => Ok(KeyAlgorithm::Rsa),
            PublicDetail::KeyedHash { .. } => Err(KeyFileError::WrongKeyType {
                operation: "key algorithm".to_string(),
                expected: "RSA or ECC".to_string(),
                actual: public.type_name().to_string(),
            }),
        }
    }

    /// RSA modulus length or EC field length, in bytes
    pub fn key_size(&self) -> KeyFileResult<usize> {
        let public = self.public()?;
        match &public.detail {
            PublicDetail::Rsa { key_bits, .. } => Ok((usize::from(*key_bits) + 7) / 8),
            PublicDetail::Ecc { curve, .. } => Ok(curve.field_len()),
            PublicDetail::KeyedHash { .. } => Err(KeyFileError::WrongKeyType {
                operation: "key size".to_string(),
                expected: "RSA or ECC".to_string(),
                actual: public.type_name().to_string(),
            }),
        }
    }

    pub fn public_key(&self) -> KeyFileResult<PublicKey> {
        PublicKey::from_public(&self.public()?)
    }

    /// Structural invariants shared by parsed and locally built keys
    pub(crate) fn validate(&self) -> KeyFileResult<()> {
        let needs_blobs = matches!(
            self.key_type,
            KeyType::Loadable | KeyType::LegacyLoadable | KeyType::Sealed
        );
        if needs_blobs && (self.pubkey.is_empty() || self.privkey.is_empty()) {
            return Err(KeyFileError::invalid_parameter(
                "pubkey/privkey",
                &format!("non-empty blobs for a {} key", self.key_type),
                "empty blob",
            ));
        }
        let importable = self.key_type == KeyType::Importable;
        if importable == self.secret.is_empty() {
            return Err(KeyFileError::invalid_parameter(
                "secret",
                "an encrypted seed exactly when the key is importable",
                &format!("{} key with {} secret bytes", self.key_type, self.secret.len()),
            ));
        }
        if let Some(index) = self.auth_policy.iter().position(|p| p.policy.is_empty()) {
            return Err(KeyFileError::invalid_parameter(
                "auth_policy",
                "at least one policy command per branch",
                &format!("empty branch at index {}", index),
            ));
        }
        Ok(())
    }

    fn validate_local(&self) -> KeyFileResult<()> {
        self.validate()?;
        if self.empty_auth != self.user_auth.is_empty() {
            return Err(KeyFileError::invalid_parameter(
                "empty_auth",
                "true exactly when the user auth is empty",
                &self.empty_auth.to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of the key with a new private blob, as produced by import and
    /// auth-change transitions
    pub(crate) fn with_private(&self, key_type: KeyType, privkey: Vec<u8>) -> TpmKey {
        let mut key = self.clone();
        key.key_type = key_type;
        key.privkey = privkey;
        if key_type != KeyType::Importable {
            key.secret.clear();
        }
        key
    }
}

impl PartialEq for TpmKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_type == other.key_type
            && self.empty_auth == other.empty_auth
            && self.policy == other.policy
            && self.secret == other.secret
            && self.auth_policy == other.auth_policy
            && self.description == other.description
            && self.parent == other.parent
            && self.pubkey == other.pubkey
            && self.privkey == other.privkey
    }
}

impl Eq for TpmKey {}

impl fmt::Debug for TpmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpmKey")
            .field("key_type", &self.key_type)
            .field("empty_auth", &self.empty_auth)
            .field("policy", &self.policy.len())
            .field("secret_len", &self.secret.len())
            .field("auth_policy", &self.auth_policy.len())
            .field("description", &self.description)
            .field("parent", &self.parent)
            .field("pubkey_len", &self.pubkey.len())
            .field("privkey_len", &self.privkey.len())
            .field("user_auth", &"[REDACTED]")
            .finish()
    }
}

/// Options applied to a key when it is built
///
/// Unset options leave the corresponding field of the key untouched.
#[derive(Clone, Default)]
pub struct KeyOptions {
    key_type: Option<KeyType>,
    policy: Option<Vec<TpmPolicy>>,
    secret: Option<Vec<u8>>,
    user_auth: Option<Zeroizing<Vec<u8>>>,
    description: Option<String>,
    parent: Option<TpmHandle>,
    auth_policy: Option<Vec<AuthPolicy>>,
    pubkey: Option<Vec<u8>>,
    privkey: Option<Vec<u8>>,
}

impl KeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = Some(key_type);
        self
    }

    pub fn policy(mut self, policy: Vec<TpmPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn secret(mut self, secret: Vec<u8>) -> Self {
        self.secret = Some(secret);
        self
    }

    /// Set the user auth; `empty_auth` follows it
    pub fn user_auth(mut self, auth: &[u8]) -> Self {
        self.user_auth = Some(Zeroizing::new(auth.to_vec()));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn parent(mut self, parent: TpmHandle) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn auth_policy(mut self, auth_policy: Vec<AuthPolicy>) -> Self {
        self.auth_policy = Some(auth_policy);
        self
    }

    pub fn pubkey(mut self, pubkey: Vec<u8>) -> Self {
        self.pubkey = Some(pubkey);
        self
    }

    pub fn privkey(mut self, privkey: Vec<u8>) -> Self {
        self.privkey = Some(privkey);
        self
    }

    /// Parent the key will be created or imported under
    pub fn parent_handle(&self) -> TpmHandle {
        self.parent.unwrap_or(TpmHandle::OWNER)
    }

    /// Apply the set options to `key`
    pub fn apply(&self, mut key: TpmKey) -> TpmKey {
        if let Some(key_type) = self.key_type {
            key.key_type = key_type;
        }
        if let Some(policy) = &self.policy {
            key.policy = policy.clone();
        }
        if let Some(secret) = &self.secret {
            key.secret = secret.clone();
        }
        if let Some(auth) = &self.user_auth {
            key.empty_auth = auth.is_empty();
            key.user_auth = auth.clone();
        }
        if let Some(description) = &self.description {
            key.description = Some(description.clone());
        }
        if let Some(parent) = self.parent {
            key.parent = parent;
        }
        if let Some(auth_policy) = &self.auth_policy {
            key.auth_policy = auth_policy.clone();
        }
        if let Some(pubkey) = &self.pubkey {
            key.pubkey = pubkey.clone();
        }
        if let Some(privkey) = &self.privkey {
            key.privkey = privkey.clone();
        }
        key
    }

    /// Apply onto the default key and validate the result
    pub fn build(self) -> KeyFileResult<TpmKey> {
        let key = self.apply(TpmKey::blank());
        key.validate_local()?;
        Ok(key)
    }
}

impl fmt::Debug for KeyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOptions")
            .field("key_type", &self.key_type)
            .field("description", &self.description)
            .field("parent", &self.parent)
            .field("user_auth", &self.user_auth.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
