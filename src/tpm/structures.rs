//! TPM 2.0 structures stored in key files and exchanged with the transport.
//!
//! The engine works with a typed view of the few object kinds it handles:
//! public areas for RSA, ECC and keyed-hash objects, sensitive areas,
//! sensitive-create areas, ECC points and signatures. Marshaling to and from
//! the TPM wire format goes through the `tpm2-protocol` structures
//! (`TpmtPublic`, `TpmtSensitive`, `TpmtSignature`, ...).

use std::fmt;

use sha2::{Digest, Sha256, Sha384, Sha512};
use tpm2_protocol::data::{
    Tpm2bAuth, Tpm2bDigest, Tpm2bPrivate, Tpm2bPublic, Tpm2bSensitive, Tpm2bSensitiveCreate,
    Tpm2bSensitiveData, TpmEccCurve, TpmsEccParms, TpmsEccPoint, TpmsKeyedhashParms, TpmsRsaParms,
    TpmsSensitiveCreate, TpmsSignatureEcc, TpmsSignatureRsa, TpmtKdfScheme, TpmtPublic, TpmtScheme,
    TpmtSensitive, TpmtSignature, TpmtSymDef, TpmtSymDefObject, TpmuPublicId, TpmuPublicParms,
    TpmuSensitiveComposite, TpmuSignature, TpmuSymKeyBits, TpmuSymMode,
};
use tpm2_protocol::{TpmBuffer, TpmBuild, TpmErrorKind, TpmParse, TpmWriter, TPM_MAX_COMMAND_SIZE};
use zeroize::Zeroizing;

use crate::error::{KeyFileError, KeyFileResult};

pub use tpm2_protocol::data::{TpmAlgId, TpmaObject};

/// A TPM handle (`TPM_HANDLE`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TpmHandle(pub u32);

/// Handle class, from the most significant octet of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    Permanent,
    Transient,
    Persistent,
    Other(u8),
}

impl TpmHandle {
    pub const OWNER: TpmHandle = TpmHandle(0x4000_0001);

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn handle_type(self) -> HandleType {
        match (self.0 >> 24) as u8 {
            0x40 => HandleType::Permanent,
            0x80 => HandleType::Transient,
            0x81 => HandleType::Persistent,
            other => HandleType::Other(other),
        }
    }
}

impl fmt::Debug for TpmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TpmHandle({:#010x})", self.0)
    }
}

impl fmt::Display for TpmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

fn parse_error(what: &'static str) -> impl Fn(TpmErrorKind) -> KeyFileError {
    move |err| KeyFileError::format(what, &err.to_string())
}

fn build_error(what: &'static str) -> impl Fn(TpmErrorKind) -> KeyFileError {
    move |err| KeyFileError::invalid_parameter(what, "a value that fits the TPM structure", &err.to_string())
}

/// Marshal a `tpm2-protocol` value into a fresh buffer
pub(crate) fn build_to_vec<T: TpmBuild>(value: &T, what: &'static str) -> KeyFileResult<Vec<u8>> {
    let mut buf = vec![0u8; TPM_MAX_COMMAND_SIZE];
    let len = {
        let mut writer = TpmWriter::new(buf.as_mut_slice());
        value.build(&mut writer).map_err(build_error(what))?;
        writer.len()
    };
    buf.truncate(len);
    Ok(buf)
}

fn expect_consumed(rest: &[u8], what: &'static str) -> KeyFileResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(KeyFileError::format(what, &format!("{} trailing bytes", rest.len())))
    }
}

/// Hash algorithms accepted for names and digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn alg_id(self) -> TpmAlgId {
        match self {
            HashAlgorithm::Sha256 => TpmAlgId::Sha256,
            HashAlgorithm::Sha384 => TpmAlgId::Sha384,
            HashAlgorithm::Sha512 => TpmAlgId::Sha512,
        }
    }

    pub fn from_alg_id(id: TpmAlgId) -> KeyFileResult<Self> {
        match id {
            TpmAlgId::Sha256 => Ok(HashAlgorithm::Sha256),
            TpmAlgId::Sha384 => Ok(HashAlgorithm::Sha384),
            TpmAlgId::Sha512 => Ok(HashAlgorithm::Sha512),
            other => Err(KeyFileError::unsupported_algorithm(
                &format!("hash {:?}", other),
                "hash selection",
            )),
        }
    }

    /// Digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// NIST curves supported for TPM ECC objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurve {
    NistP256,
    NistP384,
    NistP521,
}

impl EccCurve {
    /// `TPM_ECC_CURVE` identifier, as reported by `TPM2_GetCapability`
    pub fn curve_id(self) -> u16 {
        match self {
            EccCurve::NistP256 => 0x0003,
            EccCurve::NistP384 => 0x0004,
            EccCurve::NistP521 => 0x0005,
        }
    }

    pub fn from_curve_id(id: u16) -> Option<Self> {
        match id {
            0x0003 => Some(EccCurve::NistP256),
            0x0004 => Some(EccCurve::NistP384),
            0x0005 => Some(EccCurve::NistP521),
            _ => None,
        }
    }

    fn tpm_curve(self) -> TpmEccCurve {
        match self {
            EccCurve::NistP256 => TpmEccCurve::NistP256,
            EccCurve::NistP384 => TpmEccCurve::NistP384,
            EccCurve::NistP521 => TpmEccCurve::NistP521,
        }
    }

    fn from_tpm_curve(curve: &TpmEccCurve) -> Option<Self> {
        match curve {
            TpmEccCurve::NistP256 => Some(EccCurve::NistP256),
            TpmEccCurve::NistP384 => Some(EccCurve::NistP384),
            TpmEccCurve::NistP521 => Some(EccCurve::NistP521),
            _ => None,
        }
    }

    pub fn key_bits(self) -> u16 {
        match self {
            EccCurve::NistP256 => 256,
            EccCurve::NistP384 => 384,
            EccCurve::NistP521 => 521,
        }
    }

    pub fn from_key_bits(bits: u16) -> Option<Self> {
        match bits {
            256 => Some(EccCurve::NistP256),
            384 => Some(EccCurve::NistP384),
            521 => Some(EccCurve::NistP521),
            _ => None,
        }
    }

    /// Byte length of a field element
    pub fn field_len(self) -> usize {
        match self {
            EccCurve::NistP256 => 32,
            EccCurve::NistP384 => 48,
            EccCurve::NistP521 => 66,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EccCurve::NistP256 => "P-256",
            EccCurve::NistP384 => "P-384",
            EccCurve::NistP521 => "P-521",
        }
    }
}

/// Symmetric definition of a storage parent or session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricObject {
    pub algorithm: TpmAlgId,
    pub key_bits: u16,
    pub mode: TpmAlgId,
}

impl SymmetricObject {
    pub fn null() -> Self {
        SymmetricObject {
            algorithm: TpmAlgId::Null,
            key_bits: 0,
            mode: TpmAlgId::Null,
        }
    }

    pub fn aes_128_cfb() -> Self {
        SymmetricObject {
            algorithm: TpmAlgId::Aes,
            key_bits: 128,
            mode: TpmAlgId::Cfb,
        }
    }

    pub fn is_null(&self) -> bool {
        self.algorithm == TpmAlgId::Null
    }

    /// `TPMT_SYM_DEF_OBJECT`, as carried in public areas
    pub fn to_object_def(&self) -> TpmtSymDefObject {
        if self.is_null() {
            return TpmtSymDefObject::default();
        }
        TpmtSymDefObject {
            algorithm: self.algorithm,
            key_bits: TpmuSymKeyBits::Aes(self.key_bits),
            mode: TpmuSymMode::Aes(self.mode),
        }
    }

    /// `TPMT_SYM_DEF`, as passed to `TPM2_Import` and session setup
    pub fn to_def(&self) -> TpmtSymDef {
        if self.is_null() {
            return TpmtSymDef::default();
        }
        TpmtSymDef {
            algorithm: self.algorithm,
            key_bits: TpmuSymKeyBits::Aes(self.key_bits),
            mode: TpmuSymMode::Aes(self.mode),
        }
    }

    fn from_object_def(def: &TpmtSymDefObject) -> Self {
        match (&def.key_bits, &def.mode) {
            (TpmuSymKeyBits::Aes(key_bits), TpmuSymMode::Aes(mode)) => SymmetricObject {
                algorithm: def.algorithm,
                key_bits: *key_bits,
                mode: *mode,
            },
            _ => SymmetricObject::null(),
        }
    }
}

/// `TPMS_ECC_POINT`
#[derive(Clone, PartialEq, Eq, Default)]
pub struct EccPoint {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

impl EccPoint {
    pub fn new(x: Vec<u8>, y: Vec<u8>) -> Self {
        EccPoint { x, y }
    }

    fn to_tpms(&self) -> KeyFileResult<TpmsEccPoint> {
        Ok(TpmsEccPoint {
            x: TpmBuffer::try_from(self.x.as_slice()).map_err(build_error("ECC point x"))?,
            y: TpmBuffer::try_from(self.y.as_slice()).map_err(build_error("ECC point y"))?,
        })
    }

    fn from_tpms(point: &TpmsEccPoint) -> Self {
        EccPoint::new(point.x.to_vec(), point.y.to_vec())
    }

    pub fn marshal(&self) -> KeyFileResult<Vec<u8>> {
        build_to_vec(&self.to_tpms()?, "TPMS_ECC_POINT")
    }

    pub fn unmarshal(bytes: &[u8]) -> KeyFileResult<Self> {
        let (point, rest) = TpmsEccPoint::parse(bytes).map_err(parse_error("TPMS_ECC_POINT"))?;
        expect_consumed(rest, "TPMS_ECC_POINT")?;
        Ok(EccPoint::from_tpms(&point))
    }

    /// Split an uncompressed SEC1 point into its coordinates
    pub fn from_sec1(curve: EccCurve, sec1: &[u8]) -> KeyFileResult<Self> {
        let size = curve.field_len();
        match sec1.split_first() {
            Some((0x04, coordinates)) if coordinates.len() == 2 * size => {
                let (x, y) = coordinates.split_at(size);
                Ok(EccPoint::new(x.to_vec(), y.to_vec()))
            }
            _ => Err(KeyFileError::format(
                "SEC1 point",
                &format!("expected an uncompressed {} point", curve.name()),
            )),
        }
    }

    /// Uncompressed SEC1 encoding, coordinates padded to the curve size
    pub fn to_sec1(&self, curve: EccCurve) -> KeyFileResult<Vec<u8>> {
        let x = crate::tpm::kdf::pad_to_curve_size(curve, &self.x)?;
        let y = crate::tpm::kdf::pad_to_curve_size(curve, &self.y)?;
        let mut out = Vec::with_capacity(1 + x.len() + y.len());
        out.push(0x04);
        out.extend_from_slice(&x);
        out.extend_from_slice(&y);
        Ok(out)
    }
}

impl fmt::Debug for EccPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EccPoint")
            .field("x", &hex::encode(&self.x))
            .field("y", &hex::encode(&self.y))
            .finish()
    }
}

/// Algorithm-specific part of a public area.
///
/// `scheme` is the scheme selector of the object; the ECC KDF is always null.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicDetail {
    Rsa {
        symmetric: SymmetricObject,
        scheme: TpmAlgId,
        key_bits: u16,
        exponent: u32,
        modulus: Vec<u8>,
    },
    Ecc {
        symmetric: SymmetricObject,
        scheme: TpmAlgId,
        curve: EccCurve,
        point: EccPoint,
    },
    KeyedHash {
        scheme: TpmAlgId,
        unique: Vec<u8>,
    },
}

/// `TPMT_PUBLIC`
#[derive(Debug, Clone, PartialEq)]
pub struct Public {
    pub name_alg: HashAlgorithm,
    pub attributes: TpmaObject,
    pub auth_policy: Vec<u8>,
    pub detail: PublicDetail,
}

impl Public {
    pub fn object_type(&self) -> TpmAlgId {
        match self.detail {
            PublicDetail::Rsa { .. } => TpmAlgId::Rsa,
            PublicDetail::Ecc { .. } => TpmAlgId::Ecc,
            PublicDetail::KeyedHash { .. } => TpmAlgId::KeyedHash,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.detail {
            PublicDetail::Rsa { .. } => "RSA",
            PublicDetail::Ecc { .. } => "ECC",
            PublicDetail::KeyedHash { .. } => "KEYEDHASH",
        }
    }

    pub fn curve(&self) -> Option<EccCurve> {
        match self.detail {
            PublicDetail::Ecc { curve, .. } => Some(curve),
            _ => None,
        }
    }

    pub fn can_sign(&self) -> bool {
        self.attributes.contains(TpmaObject::SIGN_ENCRYPT)
    }

    pub fn to_tpmt(&self) -> KeyFileResult<TpmtPublic> {
        let (parameters, unique) = match &self.detail {
            PublicDetail::Rsa {
                symmetric,
                scheme,
                key_bits,
                exponent,
                modulus,
            } => (
                TpmuPublicParms::Rsa(TpmsRsaParms {
                    symmetric: symmetric.to_object_def(),
                    scheme: TpmtScheme { scheme: *scheme },
                    key_bits: (*key_bits).into(),
                    exponent: (*exponent).into(),
                }),
                TpmuPublicId::Rsa(
                    TpmBuffer::try_from(modulus.as_slice()).map_err(build_error("RSA modulus"))?,
                ),
            ),
            PublicDetail::Ecc {
                symmetric,
                scheme,
                curve,
                point,
            } => (
                TpmuPublicParms::Ecc(TpmsEccParms {
                    symmetric: symmetric.to_object_def(),
                    scheme: TpmtScheme { scheme: *scheme },
                    curve_id: curve.tpm_curve(),
                    kdf: TpmtKdfScheme::default(),
                }),
                TpmuPublicId::Ecc(point.to_tpms()?),
            ),
            PublicDetail::KeyedHash { scheme, unique } => (
                TpmuPublicParms::KeyedHash(TpmsKeyedhashParms {
                    scheme: TpmtScheme { scheme: *scheme },
                }),
                TpmuPublicId::KeyedHash(
                    TpmBuffer::try_from(unique.as_slice()).map_err(build_error("keyed-hash unique"))?,
                ),
            ),
        };
        Ok(TpmtPublic {
            object_type: self.object_type(),
            name_alg: self.name_alg.alg_id(),
            object_attributes: self.attributes,
            auth_policy: Tpm2bDigest::try_from(self.auth_policy.as_slice())
                .map_err(build_error("authPolicy"))?,
            parameters,
            unique,
        })
    }

    pub fn from_tpmt(public: &TpmtPublic) -> KeyFileResult<Self> {
        let name_alg = HashAlgorithm::from_alg_id(public.name_alg)
            .map_err(|e| KeyFileError::format("TPMT_PUBLIC", &e.to_string()))?;
        let detail = match (&public.parameters, &public.unique) {
            (TpmuPublicParms::Rsa(params), TpmuPublicId::Rsa(modulus)) => PublicDetail::Rsa {
                symmetric: SymmetricObject::from_object_def(&params.symmetric),
                scheme: params.scheme.scheme,
                key_bits: params.key_bits.into(),
                exponent: params.exponent.into(),
                modulus: modulus.to_vec(),
            },
            (TpmuPublicParms::Ecc(params), TpmuPublicId::Ecc(point)) => {
                let curve = EccCurve::from_tpm_curve(&params.curve_id).ok_or_else(|| {
                    KeyFileError::format("TPMT_PUBLIC", &format!("unsupported curve {:?}", params.curve_id))
                })?;
                PublicDetail::Ecc {
                    symmetric: SymmetricObject::from_object_def(&params.symmetric),
                    scheme: params.scheme.scheme,
                    curve,
                    point: EccPoint::from_tpms(point),
                }
            }
            (TpmuPublicParms::KeyedHash(params), TpmuPublicId::KeyedHash(unique)) => {
                let scheme = params.scheme.scheme;
                if scheme != TpmAlgId::Null && scheme != TpmAlgId::Hmac {
                    return Err(KeyFileError::format(
                        "TPMT_PUBLIC",
                        &format!("unsupported keyed-hash scheme {:?}", scheme),
                    ));
                }
                PublicDetail::KeyedHash {
                    scheme,
                    unique: unique.to_vec(),
                }
            }
            _ => {
                return Err(KeyFileError::format(
                    "TPMT_PUBLIC",
                    &format!("unsupported object type {:?}", public.object_type),
                ))
            }
        };
        Ok(Public {
            name_alg,
            attributes: public.object_attributes,
            auth_policy: public.auth_policy.to_vec(),
            detail,
        })
    }

    pub fn marshal(&self) -> KeyFileResult<Vec<u8>> {
        build_to_vec(&self.to_tpmt()?, "TPMT_PUBLIC")
    }

    /// `TPM2B_PUBLIC` encoding, the form stored in key files
    pub fn marshal_2b(&self) -> KeyFileResult<Vec<u8>> {
        build_to_vec(&Tpm2bPublic { inner: self.to_tpmt()? }, "TPM2B_PUBLIC")
    }

    pub fn unmarshal(bytes: &[u8]) -> KeyFileResult<Self> {
        let (public, rest) = TpmtPublic::parse(bytes).map_err(parse_error("TPMT_PUBLIC"))?;
        expect_consumed(rest, "TPMT_PUBLIC")?;
        Self::from_tpmt(&public)
    }

    pub fn unmarshal_2b(bytes: &[u8]) -> KeyFileResult<Self> {
        let (public, rest) = Tpm2bPublic::parse(bytes).map_err(parse_error("TPM2B_PUBLIC"))?;
        expect_consumed(rest, "TPM2B_PUBLIC")?;
        Self::from_tpmt(&public.inner)
    }

    /// Object name: `nameAlg || H(TPMT_PUBLIC)`
    pub fn name(&self) -> KeyFileResult<Vec<u8>> {
        let mut name = build_to_vec(&self.name_alg.alg_id(), "TPMI_ALG_HASH")?;
        name.extend_from_slice(&self.name_alg.digest(&self.marshal()?));
        Ok(name)
    }
}

/// `TPMU_SENSITIVE_COMPOSITE`
#[derive(Clone, PartialEq, Eq)]
pub enum SensitiveComposite {
    /// ECC private scalar
    Ecc(Zeroizing<Vec<u8>>),
    /// First RSA prime factor
    Rsa(Zeroizing<Vec<u8>>),
    /// Keyed-hash data, the payload of sealed objects
    Bits(Zeroizing<Vec<u8>>),
}

impl SensitiveComposite {
    fn sensitive_type(&self) -> TpmAlgId {
        match self {
            SensitiveComposite::Ecc(_) => TpmAlgId::Ecc,
            SensitiveComposite::Rsa(_) => TpmAlgId::Rsa,
            SensitiveComposite::Bits(_) => TpmAlgId::KeyedHash,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SensitiveComposite::Ecc(d) => d,
            SensitiveComposite::Rsa(p) => p,
            SensitiveComposite::Bits(data) => data,
        }
    }

    fn to_tpmu(&self) -> KeyFileResult<TpmuSensitiveComposite> {
        let error = build_error("TPMU_SENSITIVE_COMPOSITE");
        Ok(match self {
            SensitiveComposite::Ecc(d) => TpmuSensitiveComposite::Ecc(TpmBuffer::try_from(d.as_slice()).map_err(error)?),
            SensitiveComposite::Rsa(p) => TpmuSensitiveComposite::Rsa(TpmBuffer::try_from(p.as_slice()).map_err(error)?),
            SensitiveComposite::Bits(data) => {
                TpmuSensitiveComposite::Bits(Tpm2bSensitiveData::try_from(data.as_slice()).map_err(error)?)
            }
        })
    }
}

impl fmt::Debug for SensitiveComposite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SensitiveComposite::Ecc(_) => "Ecc",
            SensitiveComposite::Rsa(_) => "Rsa",
            SensitiveComposite::Bits(_) => "Bits",
        };
        write!(f, "{}([REDACTED])", kind)
    }
}

/// `TPMT_SENSITIVE`
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive {
    pub auth_value: Zeroizing<Vec<u8>>,
    pub seed_value: Vec<u8>,
    pub composite: SensitiveComposite,
}

impl Sensitive {
    fn to_tpmt(&self) -> KeyFileResult<TpmtSensitive> {
        Ok(TpmtSensitive {
            sensitive_type: self.composite.sensitive_type(),
            auth_value: Tpm2bAuth::try_from(self.auth_value.as_slice()).map_err(build_error("authValue"))?,
            seed_value: Tpm2bDigest::try_from(self.seed_value.as_slice()).map_err(build_error("seedValue"))?,
            sensitive: self.composite.to_tpmu()?,
        })
    }

    fn from_tpmt(sensitive: &TpmtSensitive) -> KeyFileResult<Self> {
        let composite = match &sensitive.sensitive {
            TpmuSensitiveComposite::Ecc(d) => SensitiveComposite::Ecc(Zeroizing::new(d.to_vec())),
            TpmuSensitiveComposite::Rsa(p) => SensitiveComposite::Rsa(Zeroizing::new(p.to_vec())),
            TpmuSensitiveComposite::Bits(data) => SensitiveComposite::Bits(Zeroizing::new(data.to_vec())),
            _ => {
                return Err(KeyFileError::format(
                    "TPMT_SENSITIVE",
                    &format!("unsupported sensitive type {:?}", sensitive.sensitive_type),
                ))
            }
        };
        Ok(Sensitive {
            auth_value: Zeroizing::new(sensitive.auth_value.to_vec()),
            seed_value: sensitive.seed_value.to_vec(),
            composite,
        })
    }

    /// `TPM2B_SENSITIVE` encoding (`sens2B` in the duplication protocol)
    pub fn marshal_2b(&self) -> KeyFileResult<Zeroizing<Vec<u8>>> {
        let sensitive = Tpm2bSensitive { inner: self.to_tpmt()? };
        Ok(Zeroizing::new(build_to_vec(&sensitive, "TPM2B_SENSITIVE")?))
    }

    pub fn unmarshal_2b(bytes: &[u8]) -> KeyFileResult<Self> {
        let (sensitive, rest) = Tpm2bSensitive::parse(bytes).map_err(parse_error("TPM2B_SENSITIVE"))?;
        expect_consumed(rest, "TPM2B_SENSITIVE")?;
        Self::from_tpmt(&sensitive.inner)
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensitive")
            .field("auth_value", &"[REDACTED]")
            .field("seed_value_len", &self.seed_value.len())
            .field("composite", &self.composite)
            .finish()
    }
}

/// `TPMS_SENSITIVE_CREATE`, the caller-chosen part of a new object
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SensitiveCreate {
    pub user_auth: Zeroizing<Vec<u8>>,
    pub data: Zeroizing<Vec<u8>>,
}

impl SensitiveCreate {
    pub fn new(user_auth: &[u8], data: &[u8]) -> Self {
        SensitiveCreate {
            user_auth: Zeroizing::new(user_auth.to_vec()),
            data: Zeroizing::new(data.to_vec()),
        }
    }

    pub fn to_tpm2b(&self) -> KeyFileResult<Tpm2bSensitiveCreate> {
        Ok(Tpm2bSensitiveCreate {
            inner: TpmsSensitiveCreate {
                user_auth: Tpm2bAuth::try_from(self.user_auth.as_slice()).map_err(build_error("userAuth"))?,
                data: Tpm2bSensitiveData::try_from(self.data.as_slice())
                    .map_err(build_error("sensitive data"))?,
            },
        })
    }

    /// `TPM2B_SENSITIVE_CREATE` encoding
    pub fn marshal_2b(&self) -> KeyFileResult<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(build_to_vec(&self.to_tpm2b()?, "TPM2B_SENSITIVE_CREATE")?))
    }

    pub fn unmarshal_2b(bytes: &[u8]) -> KeyFileResult<Self> {
        let (create, rest) =
            Tpm2bSensitiveCreate::parse(bytes).map_err(parse_error("TPM2B_SENSITIVE_CREATE"))?;
        expect_consumed(rest, "TPM2B_SENSITIVE_CREATE")?;
        Ok(SensitiveCreate::new(&create.inner.user_auth, &create.inner.data))
    }
}

impl fmt::Debug for SensitiveCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensitiveCreate")
            .field("user_auth", &"[REDACTED]")
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Signing scheme passed to `TPM2_Sign` (`TPMT_SIG_SCHEME`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigScheme {
    Ecdsa(HashAlgorithm),
    RsaSsa(HashAlgorithm),
    RsaPss(HashAlgorithm),
}

impl SigScheme {
    pub fn alg_id(self) -> TpmAlgId {
        match self {
            SigScheme::Ecdsa(_) => TpmAlgId::Ecdsa,
            SigScheme::RsaSsa(_) => TpmAlgId::Rsassa,
            SigScheme::RsaPss(_) => TpmAlgId::Rsapss,
        }
    }

    pub fn hash(self) -> HashAlgorithm {
        match self {
            SigScheme::Ecdsa(h) | SigScheme::RsaSsa(h) | SigScheme::RsaPss(h) => h,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SigScheme::Ecdsa(_) => "ECDSA",
            SigScheme::RsaSsa(_) => "RSASSA-PKCS1-v1_5",
            SigScheme::RsaPss(_) => "RSASSA-PSS",
        }
    }
}

/// `TPMT_SIGNATURE`
#[derive(Clone, PartialEq, Eq)]
pub enum Signature {
    Ecdsa {
        hash: HashAlgorithm,
        r: Vec<u8>,
        s: Vec<u8>,
    },
    RsaSsa {
        hash: HashAlgorithm,
        sig: Vec<u8>,
    },
    RsaPss {
        hash: HashAlgorithm,
        sig: Vec<u8>,
    },
}

impl Signature {
    pub fn scheme(&self) -> SigScheme {
        match self {
            Signature::Ecdsa { hash, .. } => SigScheme::Ecdsa(*hash),
            Signature::RsaSsa { hash, .. } => SigScheme::RsaSsa(*hash),
            Signature::RsaPss { hash, .. } => SigScheme::RsaPss(*hash),
        }
    }

    pub fn to_tpmt(&self) -> KeyFileResult<TpmtSignature> {
        let error = build_error("TPMT_SIGNATURE");
        let signature = match self {
            Signature::Ecdsa { hash, r, s } => TpmuSignature::Ecdsa(TpmsSignatureEcc {
                hash: hash.alg_id(),
                signature_r: TpmBuffer::try_from(r.as_slice()).map_err(&error)?,
                signature_s: TpmBuffer::try_from(s.as_slice()).map_err(&error)?,
            }),
            Signature::RsaSsa { hash, sig } => TpmuSignature::Rsassa(TpmsSignatureRsa {
                hash: hash.alg_id(),
                sig: TpmBuffer::try_from(sig.as_slice()).map_err(&error)?,
            }),
            Signature::RsaPss { hash, sig } => TpmuSignature::Rsapss(TpmsSignatureRsa {
                hash: hash.alg_id(),
                sig: TpmBuffer::try_from(sig.as_slice()).map_err(&error)?,
            }),
        };
        Ok(TpmtSignature {
            sig_alg: self.scheme().alg_id(),
            signature,
        })
    }

    pub fn from_tpmt(signature: &TpmtSignature) -> KeyFileResult<Self> {
        let hash = |alg: TpmAlgId| {
            HashAlgorithm::from_alg_id(alg).map_err(|e| KeyFileError::format("TPMT_SIGNATURE", &e.to_string()))
        };
        match &signature.signature {
            TpmuSignature::Ecdsa(ecc) => Ok(Signature::Ecdsa {
                hash: hash(ecc.hash)?,
                r: ecc.signature_r.to_vec(),
                s: ecc.signature_s.to_vec(),
            }),
            TpmuSignature::Rsassa(rsa) => Ok(Signature::RsaSsa {
                hash: hash(rsa.hash)?,
                sig: rsa.sig.to_vec(),
            }),
            TpmuSignature::Rsapss(rsa) => Ok(Signature::RsaPss {
                hash: hash(rsa.hash)?,
                sig: rsa.sig.to_vec(),
            }),
            _ => Err(KeyFileError::format(
                "TPMT_SIGNATURE",
                &format!("unsupported signature algorithm {:?}", signature.sig_alg),
            )),
        }
    }

    pub fn marshal(&self) -> KeyFileResult<Vec<u8>> {
        build_to_vec(&self.to_tpmt()?, "TPMT_SIGNATURE")
    }

    pub fn unmarshal(bytes: &[u8]) -> KeyFileResult<Self> {
        let (signature, rest) = TpmtSignature::parse(bytes).map_err(parse_error("TPMT_SIGNATURE"))?;
        expect_consumed(rest, "TPMT_SIGNATURE")?;
        Self::from_tpmt(&signature)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Ecdsa { hash, r, s } => f
                .debug_struct("Ecdsa")
                .field("hash", hash)
                .field("r", &hex::encode(r))
                .field("s", &hex::encode(s))
                .finish(),
            Signature::RsaSsa { hash, sig } => f
                .debug_struct("RsaSsa")
                .field("hash", hash)
                .field("sig_len", &sig.len())
                .finish(),
            Signature::RsaPss { hash, sig } => f
                .debug_struct("RsaPss")
                .field("hash", hash)
                .field("sig_len", &sig.len())
                .finish(),
        }
    }
}

/// `TPM2B_PRIVATE` framing of a private blob
pub fn marshal_2b(body: &[u8]) -> KeyFileResult<Vec<u8>> {
    let private = Tpm2bPrivate::try_from(body).map_err(build_error("TPM2B_PRIVATE"))?;
    build_to_vec(&private, "TPM2B_PRIVATE")
}

/// Contents of a `TPM2B_PRIVATE`; the size must cover the rest exactly
pub fn unmarshal_2b(bytes: &[u8], what: &'static str) -> KeyFileResult<Vec<u8>> {
    let (private, rest) = Tpm2bPrivate::parse(bytes).map_err(parse_error(what))?;
    expect_consumed(rest, what)?;
    Ok(private.to_vec())
}

/// `TPM2B_DIGEST` framing, used for the outer HMAC of a duplicate
pub fn marshal_digest(digest: &[u8]) -> KeyFileResult<Vec<u8>> {
    let digest = Tpm2bDigest::try_from(digest).map_err(build_error("TPM2B_DIGEST"))?;
    build_to_vec(&digest, "TPM2B_DIGEST")
}
