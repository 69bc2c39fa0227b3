/*!
 * Signing with TPM-resident keys
 *
 * Digests are signed by the TPM with a scheme chosen from the key algorithm
 * and the caller's request. RSA keys asked for PKCS#1 v1.5 over SHA-512 are
 * signed through `TPM2_RSA_Decrypt` on a locally padded block, since many
 * TPMs do not implement SHA-512 signing. Signatures can be rendered in their
 * usual ASN.1 form and verified locally against the key's public area.
 */

use der::asn1::UintRef;
use der::{Decode, Encode, Sequence};
use ecdsa::signature::hazmat::PrehashVerifier;
use rsa::{Pkcs1v15Sign, Pss};
use sha2::{Sha256, Sha384, Sha512};

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyAlgorithm, KeyType, PublicKey, TpmKey};
use crate::tpm::kdf::pad_to_curve_size;
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::{EccCurve, HashAlgorithm, SigScheme, Signature, TpmAlgId};
use crate::tpm::transport::{AuthHandle, Command, Response, Transport};

/// Signature scheme requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureScheme {
    /// ECDSA for EC keys, RSASSA-PKCS1-v1_5 for RSA keys
    #[default]
    Default,
    Pkcs1v15,
    Pss,
}

/// `Ecdsa-Sig-Value` from RFC 3279
#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

/// DER `DigestInfo` headers for PKCS#1 v1.5 signatures (RFC 8017, 9.2)
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];
const SHA384_DIGEST_INFO: [u8; 19] = [
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05,
    0x00, 0x04, 0x30,
];
const SHA512_DIGEST_INFO: [u8; 19] = [
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05,
    0x00, 0x04, 0x40,
];

fn digest_info(hash: HashAlgorithm) -> &'static [u8] {
    match hash {
        HashAlgorithm::Sha256 => &SHA256_DIGEST_INFO,
        HashAlgorithm::Sha384 => &SHA384_DIGEST_INFO,
        HashAlgorithm::Sha512 => &SHA512_DIGEST_INFO,
    }
}

/// Check that `digest` has the length `hash` produces
pub fn check_digest(digest: &[u8], hash: HashAlgorithm) -> KeyFileResult<()> {
    if digest.len() != hash.digest_len() {
        return Err(KeyFileError::InvalidDigestLength {
            hash: hash.name().to_string(),
            expected: hash.digest_len(),
            actual: digest.len(),
        });
    }
    Ok(())
}

/// Pick the TPM signing scheme for a key algorithm and a requested scheme
pub fn select_scheme(
    key_algorithm: KeyAlgorithm,
    requested: SignatureScheme,
    hash: HashAlgorithm,
) -> KeyFileResult<SigScheme> {
    match (key_algorithm, requested) {
        (KeyAlgorithm::Ecc, SignatureScheme::Default | SignatureScheme::Pkcs1v15) => Ok(SigScheme::Ecdsa(hash)),
        (KeyAlgorithm::Ecc, SignatureScheme::Pss) => Err(KeyFileError::SchemeMismatch {
            scheme: "RSASSA-PSS".to_string(),
            key_algorithm: key_algorithm.to_string(),
        }),
        (KeyAlgorithm::Rsa, SignatureScheme::Default | SignatureScheme::Pkcs1v15) => Ok(SigScheme::RsaSsa(hash)),
        (KeyAlgorithm::Rsa, SignatureScheme::Pss) => Ok(SigScheme::RsaPss(hash)),
    }
}

/// EMSA-PKCS1-v1_5 encoding: `00 01 FF.. 00 || DigestInfo || H`
pub fn emsa_pkcs1_v15(digest: &[u8], hash: HashAlgorithm, key_size: usize) -> KeyFileResult<Vec<u8>> {
    check_digest(digest, hash)?;
    let prefix = digest_info(hash);
    let t_len = prefix.len() + digest.len();
    if key_size < t_len + 11 {
        return Err(KeyFileError::invalid_parameter(
            "key_size",
            &format!("at least {} bytes for {}", t_len + 11, hash),
            &key_size.to_string(),
        ));
    }
    let mut em = Vec::with_capacity(key_size);
    em.extend_from_slice(&[0x00, 0x01]);
    em.resize(key_size - t_len - 1, 0xff);
    em.push(0x00);
    em.extend_from_slice(prefix);
    em.extend_from_slice(digest);
    Ok(em)
}

fn der_integer(value: &[u8]) -> KeyFileResult<UintRef<'_>> {
    if value.iter().all(|&b| b == 0) {
        return Err(KeyFileError::crypto_failure(
            "signature encoding",
            "ECDSA signature component is zero",
        ));
    }
    Ok(UintRef::new(value)?)
}

/// Render a TPM signature in its usual external form: DER `Ecdsa-Sig-Value`
/// for ECDSA, the raw signature block for RSA
pub fn encode_signature_asn1(signature: &Signature) -> KeyFileResult<Vec<u8>> {
    match signature {
        Signature::Ecdsa { r, s, .. } => Ok(EcdsaSigValue {
            r: der_integer(r)?,
            s: der_integer(s)?,
        }
        .to_der()?),
        Signature::RsaSsa { sig, .. } | Signature::RsaPss { sig, .. } => Ok(sig.clone()),
    }
}

/// Fixed-size `r || s` from a DER `Ecdsa-Sig-Value`
fn ecdsa_raw(curve: EccCurve, der: &[u8]) -> KeyFileResult<Vec<u8>> {
    let value = EcdsaSigValue::from_der(der)?;
    let mut raw = pad_to_curve_size(curve, value.r.as_bytes())?;
    raw.extend_from_slice(&pad_to_curve_size(curve, value.s.as_bytes())?);
    Ok(raw)
}

macro_rules! verify_ecdsa {
    ($curve:ty, $tpm_curve:expr, $key:expr, $digest:expr, $signature:expr) => {{
        let verified = ecdsa_raw($tpm_curve, $signature).and_then(|raw| {
            ecdsa::Signature::<$curve>::from_slice(&raw)
                .map_err(|e| KeyFileError::crypto_failure("ECDSA signature", &e.to_string()))
        });
        match verified {
            Ok(signature) => ecdsa::VerifyingKey::<$curve>::from($key)
                .verify_prehash($digest, &signature)
                .is_ok(),
            Err(_) => false,
        }
    }};
}

/// Verify a signature produced by [`TpmConnection::sign_asn1`] without a TPM
pub fn verify_signature(
    public_key: &PublicKey,
    digest: &[u8],
    hash: HashAlgorithm,
    scheme: SignatureScheme,
    signature: &[u8],
) -> bool {
    if check_digest(digest, hash).is_err() {
        return false;
    }
    let scheme = match select_scheme(public_key.algorithm(), scheme, hash) {
        Ok(scheme) => scheme,
        Err(_) => return false,
    };
    match public_key {
        PublicKey::P256(key) => verify_ecdsa!(p256::NistP256, EccCurve::NistP256, key, digest, signature),
        PublicKey::P384(key) => verify_ecdsa!(p384::NistP384, EccCurve::NistP384, key, digest, signature),
        PublicKey::P521(key) => verify_ecdsa!(p521::NistP521, EccCurve::NistP521, key, digest, signature),
        PublicKey::Rsa(key) => {
            let result = match scheme {
                SigScheme::RsaSsa(HashAlgorithm::Sha256) => key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature),
                SigScheme::RsaSsa(HashAlgorithm::Sha384) => key.verify(Pkcs1v15Sign::new::<Sha384>(), digest, signature),
                SigScheme::RsaSsa(HashAlgorithm::Sha512) => key.verify(Pkcs1v15Sign::new::<Sha512>(), digest, signature),
                SigScheme::RsaPss(HashAlgorithm::Sha256) => key.verify(Pss::new::<Sha256>(), digest, signature),
                SigScheme::RsaPss(HashAlgorithm::Sha384) => key.verify(Pss::new::<Sha384>(), digest, signature),
                SigScheme::RsaPss(HashAlgorithm::Sha512) => key.verify(Pss::new::<Sha512>(), digest, signature),
                SigScheme::Ecdsa(_) => return false,
            };
            result.is_ok()
        }
    }
}

impl<T: Transport> TpmConnection<T> {
    /// Sign `digest` with a key file's key.
    ///
    /// Importable keys are imported first; the loadable key produced by the
    /// import is used for this call only.
    ///
    /// # Arguments
    ///
    /// * `key` - Loadable, legacy loadable or importable key
    /// * `owner_auth` - Auth of the key's parent
    /// * `user_auth` - Auth of the key itself
    /// * `digest` - Message digest of `hash`'s length
    /// * `hash` - Hash algorithm that produced `digest`
    /// * `scheme` - Requested signature scheme
    pub fn sign(
        &mut self,
        key: &TpmKey,
        owner_auth: &[u8],
        user_auth: &[u8],
        digest: &[u8],
        hash: HashAlgorithm,
        scheme: SignatureScheme,
    ) -> KeyFileResult<Signature> {
        check_digest(digest, hash)?;

        let imported;
        let key = if key.key_type() == KeyType::Importable {
            imported = self.import_key(key, owner_auth)?;
            &imported
        } else {
            key
        };
        if !key.key_type().is_loadable() {
            return Err(KeyFileError::NotSignable {
                key_type: key.key_type().to_string(),
            });
        }
        if !key.public()?.can_sign() {
            return Err(KeyFileError::NoSignerCapability);
        }
        let sig_scheme = select_scheme(key.key_algorithm()?, scheme, hash)?;
        let key_size = key.key_size()?;

        self.with_parent(key.parent(), owner_auth, |conn, parent| {
            conn.with_loaded_key(parent, key, user_auth, |conn, object| match sig_scheme {
                SigScheme::RsaSsa(HashAlgorithm::Sha512) => conn.sign_with_decrypt(object, digest, key_size),
                _ => {
                    let command = Command::Sign {
                        key: object.clone(),
                        digest: digest.to_vec(),
                        scheme: sig_scheme,
                    };
                    match conn.execute(command, Some(SessionEncryption::In), "sign")? {
                        Response::Sign { signature } => Ok(signature),
                        _ => Err(mismatch("TPM2_Sign")),
                    }
                }
            })
        })
    }

    /// [`sign`](Self::sign), with the signature in ASN.1/raw form
    pub fn sign_asn1(
        &mut self,
        key: &TpmKey,
        owner_auth: &[u8],
        user_auth: &[u8],
        digest: &[u8],
        hash: HashAlgorithm,
        scheme: SignatureScheme,
    ) -> KeyFileResult<Vec<u8>> {
        let signature = self.sign(key, owner_auth, user_auth, digest, hash, scheme)?;
        encode_signature_asn1(&signature)
    }

    /// RSASSA-PKCS1-v1_5 with SHA-512 as a raw RSA private operation
    fn sign_with_decrypt(&mut self, object: &AuthHandle, digest: &[u8], key_size: usize) -> KeyFileResult<Signature> {
        let command = Command::RsaDecrypt {
            key: object.clone(),
            cipher_text: emsa_pkcs1_v15(digest, HashAlgorithm::Sha512, key_size)?,
            scheme: TpmAlgId::Null,
            label: Vec::new(),
        };
        match self.execute(command, Some(SessionEncryption::In), "sign")? {
            Response::RsaDecrypt { message } => Ok(Signature::RsaSsa {
                hash: HashAlgorithm::Sha512,
                sig: message.to_vec(),
            }),
            _ => Err(mismatch("TPM2_RSA_Decrypt")),
        }
    }
}
