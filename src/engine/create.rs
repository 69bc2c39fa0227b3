//! Device-generated loadable keys.

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyAlgorithm, KeyOptions, KeyType, TpmKey};
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::{
    marshal_2b, EccCurve, EccPoint, HashAlgorithm, TpmaObject, Public, PublicDetail, TpmAlgId,
    SensitiveCreate, SymmetricObject,
};
use crate::tpm::transport::{Command, Response, Transport};

/// The only RSA modulus size the engine creates
pub const RSA_KEY_BITS: u16 = 2048;

fn loadable_attributes() -> TpmaObject {
    TpmaObject::FIXED_TPM
        | TpmaObject::FIXED_PARENT
        | TpmaObject::SENSITIVE_DATA_ORIGIN
        | TpmaObject::USER_WITH_AUTH
        | TpmaObject::SIGN_ENCRYPT
        | TpmaObject::DECRYPT
}

/// Template for an unrestricted sign/decrypt ECC key
pub fn ecc_template(curve: EccCurve) -> Public {
    Public {
        name_alg: HashAlgorithm::Sha256,
        attributes: loadable_attributes(),
        auth_policy: Vec::new(),
        detail: PublicDetail::Ecc {
            symmetric: SymmetricObject::null(),
            scheme: TpmAlgId::Null,
            curve,
            point: EccPoint::default(),
        },
    }
}

/// Template for an unrestricted sign/decrypt RSA key with the default exponent
pub fn rsa_template(key_bits: u16) -> Public {
    Public {
        name_alg: HashAlgorithm::Sha256,
        attributes: loadable_attributes(),
        auth_policy: Vec::new(),
        detail: PublicDetail::Rsa {
            symmetric: SymmetricObject::null(),
            scheme: TpmAlgId::Null,
            key_bits,
            exponent: 0,
            modulus: Vec::new(),
        },
    }
}

impl<T: Transport> TpmConnection<T> {
    fn key_template(&mut self, algorithm: KeyAlgorithm, bits: u16) -> KeyFileResult<Public> {
        match algorithm {
            KeyAlgorithm::Ecc => {
                let bits = if bits == 0 { 256 } else { bits };
                let curve = EccCurve::from_key_bits(bits).ok_or_else(|| KeyFileError::UnsupportedKeySize {
                    algorithm: algorithm.to_string(),
                    bits,
                    reason: "ECC keys must be 256, 384 or 521 bits".to_string(),
                })?;
                if !self.supported_curves()?.contains(&curve) {
                    return Err(KeyFileError::UnsupportedKeySize {
                        algorithm: algorithm.to_string(),
                        bits,
                        reason: format!("the TPM does not implement {}", curve.name()),
                    });
                }
                Ok(ecc_template(curve))
            }
            KeyAlgorithm::Rsa => {
                let bits = if bits == 0 { RSA_KEY_BITS } else { bits };
                if bits != RSA_KEY_BITS {
                    return Err(KeyFileError::UnsupportedKeySize {
                        algorithm: algorithm.to_string(),
                        bits,
                        reason: format!("RSA keys must be {} bits", RSA_KEY_BITS),
                    });
                }
                Ok(rsa_template(bits))
            }
        }
    }

    /// Create a new key inside the TPM and wrap it in a loadable key file.
    ///
    /// # Arguments
    ///
    /// * `algorithm` - ECC or RSA
    /// * `bits` - Key size; 0 selects P-256 or RSA 2048
    /// * `owner_auth` - Auth of the parent hierarchy or persistent key
    /// * `user_auth` - Auth value of the new key, empty for none
    /// * `options` - Key file options; `parent` selects where to create it
    pub fn create_loadable_key(
        &mut self,
        algorithm: KeyAlgorithm,
        bits: u16,
        owner_auth: &[u8],
        user_auth: &[u8],
        options: KeyOptions,
    ) -> KeyFileResult<TpmKey> {
        let template = self.key_template(algorithm, bits)?;
        let parent = options.parent_handle();

        let (private, public) = self.with_parent(parent, owner_auth, |conn, resolved| {
            let command = Command::Create {
                parent: resolved.handle.clone(),
                in_sensitive: SensitiveCreate::new(user_auth, &[]),
                in_public: template,
            };
            match conn.execute(command, Some(SessionEncryption::InOut), "create_loadable_key")? {
                Response::Create { private, public } => Ok((private, public)),
                _ => Err(mismatch("TPM2_Create")),
            }
        })?;

        let key = TpmKey::from_device_blobs(
            KeyType::Loadable,
            public.marshal_2b()?,
            marshal_2b(&private)?,
            options.parent(parent).user_auth(user_auth),
        )?;
        log::info!("Created {} key under parent {}", algorithm, parent);
        Ok(key)
    }
}

#[cfg(test)]
mod tests;
