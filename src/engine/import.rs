/*!
 * Key import via the TPM duplication protocol
 *
 * An externally generated private key is wrapped offline against the public
 * area of an ECC P-256 storage parent. Only that parent can unwrap the
 * result: the wrapping seed is agreed through ECDH with the parent's public
 * point, and the sensitive area is encrypted and integrity-protected with
 * keys derived from it. The wrapped key is stored as an importable key file
 * and turned into a loadable one with `TPM2_Import` when first used.
 */

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyOptions, KeyType, TpmKey, DEFAULT_RSA_EXPONENT};
use crate::tpm::kdf::{kdfa, kdfe, pad_to_curve_size};
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::{
    marshal_2b, marshal_digest, unmarshal_2b, EccCurve, EccPoint, HashAlgorithm, Public,
    PublicDetail, Sensitive, SensitiveComposite, SymmetricObject, TpmAlgId, TpmaObject,
};
use crate::tpm::transport::{Command, Response, Transport};

type HmacSha256 = Hmac<Sha256>;

/// AES-128 key size of the parent's symmetric definition, in bits
const STORAGE_KEY_BITS: u32 = 128;

/// Seed size for a SHA-256 parent name algorithm, in bits
const SEED_BITS: u32 = 256;

/// EC private key on a curve the TPM can import
#[derive(Clone)]
pub enum EccPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

impl EccPrivateKey {
    pub fn curve(&self) -> EccCurve {
        match self {
            EccPrivateKey::P256(_) => EccCurve::NistP256,
            EccPrivateKey::P384(_) => EccCurve::NistP384,
            EccPrivateKey::P521(_) => EccCurve::NistP521,
        }
    }

    fn scalar(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(match self {
            EccPrivateKey::P256(key) => key.to_bytes().to_vec(),
            EccPrivateKey::P384(key) => key.to_bytes().to_vec(),
            EccPrivateKey::P521(key) => key.to_bytes().to_vec(),
        })
    }

    fn point(&self) -> KeyFileResult<EccPoint> {
        let sec1 = match self {
            EccPrivateKey::P256(key) => key.public_key().to_encoded_point(false).as_bytes().to_vec(),
            EccPrivateKey::P384(key) => key.public_key().to_encoded_point(false).as_bytes().to_vec(),
            EccPrivateKey::P521(key) => key.public_key().to_encoded_point(false).as_bytes().to_vec(),
        };
        EccPoint::from_sec1(self.curve(), &sec1)
    }
}

/// A private key generated outside the TPM
#[derive(Clone)]
pub enum ExternalKey {
    Ecc(EccPrivateKey),
    Rsa(rsa::RsaPrivateKey),
}

impl ExternalKey {
    /// Public area the key will have once imported
    pub fn public(&self) -> KeyFileResult<Public> {
        let attributes = TpmaObject::USER_WITH_AUTH | TpmaObject::SIGN_ENCRYPT | TpmaObject::DECRYPT;
        let detail = match self {
            ExternalKey::Ecc(key) => PublicDetail::Ecc {
                symmetric: SymmetricObject::null(),
                scheme: TpmAlgId::Null,
                curve: key.curve(),
                point: key.point()?,
            },
            ExternalKey::Rsa(key) => {
                let key_bits = u16::try_from(key.size() * 8).map_err(|_| {
                    KeyFileError::invalid_parameter("RSA key", "at most 65535 bits", &key.size().to_string())
                })?;
                PublicDetail::Rsa {
                    symmetric: SymmetricObject::null(),
                    scheme: TpmAlgId::Null,
                    key_bits,
                    exponent: tpm_exponent(key.e())?,
                    modulus: key.n().to_bytes_be(),
                }
            }
        };
        Ok(Public {
            name_alg: HashAlgorithm::Sha256,
            attributes,
            auth_policy: Vec::new(),
            detail,
        })
    }

    fn sensitive(&self, user_auth: &[u8]) -> KeyFileResult<Sensitive> {
        let composite = match self {
            ExternalKey::Ecc(key) => SensitiveComposite::Ecc(key.scalar()),
            ExternalKey::Rsa(key) => {
                let prime = key.primes().first().ok_or_else(|| {
                    KeyFileError::invalid_parameter("RSA key", "prime factors", "none")
                })?;
                SensitiveComposite::Rsa(Zeroizing::new(prime.to_bytes_be()))
            }
        };
        Ok(Sensitive {
            auth_value: Zeroizing::new(user_auth.to_vec()),
            seed_value: Vec::new(),
            composite,
        })
    }
}

/// TPM public areas store the default exponent as zero
fn tpm_exponent(e: &rsa::BigUint) -> KeyFileResult<u32> {
    let bytes = e.to_bytes_be();
    if bytes.len() > 4 {
        return Err(KeyFileError::unsupported_algorithm(
            "RSA exponent wider than 32 bits",
            "import",
        ));
    }
    let exponent = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok(if exponent == DEFAULT_RSA_EXPONENT { 0 } else { exponent })
}

/// Output of the duplication wrap, ready for `TPM2_Import`
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateBlob {
    pub public: Public,
    /// `TPM2B_PRIVATE` holding the outer HMAC and the encrypted sensitive area
    pub duplicate: Vec<u8>,
    /// Ephemeral ECC point (`TPMS_ECC_POINT`) the parent uses to recover the seed
    pub encrypted_seed: Vec<u8>,
}

/// Wrap `key` so that only the TPM object with `parent_public` can import it.
///
/// # Arguments
///
/// * `parent_public` - Public area of an ECC P-256 storage parent
/// * `key` - The private key to wrap
/// * `user_auth` - Auth value the imported key will require
pub fn wrap_external_key(parent_public: &Public, key: &ExternalKey, user_auth: &[u8]) -> KeyFileResult<DuplicateBlob> {
    let parent_point = match &parent_public.detail {
        PublicDetail::Ecc {
            curve: EccCurve::NistP256,
            point,
            ..
        } => point,
        PublicDetail::Ecc { curve, .. } => {
            return Err(KeyFileError::UnsupportedParentType {
                parent_type: format!("ECC {}", curve.name()),
            })
        }
        _ => {
            return Err(KeyFileError::UnsupportedParentType {
                parent_type: parent_public.type_name().to_string(),
            })
        }
    };
    let parent_key = p256::PublicKey::from_sec1_bytes(&parent_point.to_sec1(EccCurve::NistP256)?)
        .map_err(|e| KeyFileError::crypto_failure("parent public key", &e.to_string()))?;

    let ephemeral = p256::ecdh::EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = EccPoint::from_sec1(
        EccCurve::NistP256,
        ephemeral.public_key().to_encoded_point(false).as_bytes(),
    )?;
    let shared = ephemeral.diffie_hellman(&parent_key);
    let seed = kdfe(
        shared.raw_secret_bytes(),
        "DUPLICATE",
        &ephemeral_point.x,
        &pad_to_curve_size(EccCurve::NistP256, &parent_point.x)?,
        SEED_BITS,
    )?;
    let encrypted_seed = ephemeral_point.marshal()?;

    let public = key.public()?;
    let name = public.name()?;
    let sensitive = key.sensitive(user_auth)?.marshal_2b()?;

    let storage_key = kdfa(&seed, "STORAGE", &name, &[], STORAGE_KEY_BITS)?;
    let mut encrypted = sensitive.to_vec();
    cfb_mode::Encryptor::<Aes128>::new_from_slices(&storage_key, &[0u8; 16])
        .map_err(|e| KeyFileError::crypto_failure("AES-128-CFB", &e.to_string()))?
        .encrypt(&mut encrypted);

    let integrity_key = kdfa(&seed, "INTEGRITY", &[], &[], SEED_BITS)?;
    let mut mac = HmacSha256::new_from_slice(&integrity_key)
        .map_err(|e| KeyFileError::crypto_failure("outer HMAC", &e.to_string()))?;
    mac.update(&encrypted);
    mac.update(&name);
    let outer_hmac = mac.finalize().into_bytes();

    let mut body = marshal_digest(&outer_hmac)?;
    body.extend_from_slice(&encrypted);
    Ok(DuplicateBlob {
        public,
        duplicate: marshal_2b(&body)?,
        encrypted_seed,
    })
}

/// Wrap `key` for `parent_public` and package it as an importable key file
pub fn wrap_importable_key(
    parent_public: &Public,
    key: &ExternalKey,
    user_auth: &[u8],
    options: KeyOptions,
) -> KeyFileResult<TpmKey> {
    let blob = wrap_external_key(parent_public, key, user_auth)?;
    let key = TpmKey::from_device_blobs(
        KeyType::Importable,
        blob.public.marshal_2b()?,
        blob.duplicate,
        options.secret(blob.encrypted_seed).user_auth(user_auth),
    )?;
    log::info!("Wrapped external {} key for import", blob.public.type_name());
    Ok(key)
}

impl<T: Transport> TpmConnection<T> {
    /// Import an importable key under its parent and return the loadable key
    /// the TPM produced for it. `key` itself is left unchanged.
    pub fn import_key(&mut self, key: &TpmKey, owner_auth: &[u8]) -> KeyFileResult<TpmKey> {
        if key.key_type() != KeyType::Importable {
            return Err(KeyFileError::NotLoadable {
                key_type: key.key_type().to_string(),
            });
        }
        let object_public = key.public()?;
        let duplicate = unmarshal_2b(key.privkey(), "TPM2B_PRIVATE")?;
        let in_sym_seed = key.secret().to_vec();

        let private = self.with_parent(key.parent(), owner_auth, |conn, parent| {
            let command = Command::Import {
                parent: parent.handle.clone(),
                encryption_key: Vec::new(),
                object_public,
                duplicate,
                in_sym_seed,
                symmetric: SymmetricObject::null(),
            };
            match conn.execute(command, Some(SessionEncryption::InOut), "import_key")? {
                Response::Import { private } => Ok(private),
                _ => Err(mismatch("TPM2_Import")),
            }
        })?;

        log::info!("Imported key under parent {}", key.parent());
        Ok(key.with_private(KeyType::Loadable, marshal_2b(&private)?))
    }
}
