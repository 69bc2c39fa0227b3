//! ECDH key agreement with a TPM-resident P-256 key.

use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyAlgorithm, KeyType, TpmKey};
use crate::tpm::kdf::pad_to_curve_size;
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::{EccCurve, EccPoint};
use crate::tpm::transport::{Command, Response, Transport};

impl<T: Transport> TpmConnection<T> {
    /// Agree on a key with `peer` and stretch the shared point through
    /// HKDF-SHA256.
    ///
    /// The HKDF salt binds both public keys (peer first) and the info string
    /// is the configured ECDH label.
    pub fn derive_ecdh(
        &mut self,
        key: &TpmKey,
        peer: &p256::PublicKey,
        owner_auth: &[u8],
        user_auth: &[u8],
    ) -> KeyFileResult<Zeroizing<Vec<u8>>> {
        let public = key.public()?;
        if key.key_algorithm()? != KeyAlgorithm::Ecc {
            return Err(KeyFileError::WrongKeyType {
                operation: "derive_ecdh".to_string(),
                expected: "ECC".to_string(),
                actual: public.type_name().to_string(),
            });
        }
        if public.curve() != Some(EccCurve::NistP256) {
            let curve = public.curve().map(EccCurve::name).unwrap_or("unknown curve");
            return Err(KeyFileError::unsupported_algorithm(curve, "derive_ecdh"));
        }
        if !key.key_type().is_loadable() && key.key_type() != KeyType::Importable {
            return Err(KeyFileError::NotLoadable {
                key_type: key.key_type().to_string(),
            });
        }

        let imported;
        let key = if key.key_type() == KeyType::Importable {
            imported = self.import_key(key, owner_auth)?;
            &imported
        } else {
            key
        };

        let peer_sec1 = peer.to_encoded_point(false);
        let in_point = EccPoint::from_sec1(EccCurve::NistP256, peer_sec1.as_bytes())?;
        let z = self.with_parent(key.parent(), owner_auth, |conn, parent| {
            conn.with_loaded_key(parent, key, user_auth, |conn, object| {
                let command = Command::EcdhZGen {
                    key: object.clone(),
                    in_point,
                };
                match conn.execute(command, Some(SessionEncryption::InOut), "derive_ecdh")? {
                    Response::EcdhZGen { point } => Ok(point),
                    _ => Err(mismatch("TPM2_ECDH_ZGen")),
                }
            })
        })?;

        let own_sec1 = key
            .public_key()?
            .to_sec1()
            .ok_or_else(|| KeyFileError::crypto_failure("derive_ecdh", "key has no EC point"))?;
        let mut salt = peer_sec1.as_bytes().to_vec();
        salt.extend_from_slice(&own_sec1);

        let ikm = Zeroizing::new(pad_to_curve_size(EccCurve::NistP256, &z.x)?);
        let mut okm = Zeroizing::new(vec![0u8; self.config().ecdh_key_len]);
        Hkdf::<Sha256>::new(Some(&salt), &ikm)
            .expand(self.config().ecdh_label.as_bytes(), &mut okm)
            .map_err(|e| KeyFileError::crypto_failure("HKDF-SHA256", &e.to_string()))?;
        Ok(okm)
    }
}
