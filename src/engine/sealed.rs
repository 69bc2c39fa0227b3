//! Sealed data objects: small secrets stored as TPM keyed-hash objects.

use zeroize::Zeroizing;

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyOptions, KeyType, TpmKey};
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::{
    marshal_2b, HashAlgorithm, TpmaObject, Public, PublicDetail, TpmAlgId, SensitiveCreate,
};
use crate::tpm::transport::{Command, Response, Transport};

/// Largest payload a keyed-hash object can hold (`MAX_SYM_DATA`)
pub const MAX_SEALED_DATA: usize = 128;

/// Template for a sealed data object; it can neither sign nor decrypt
pub fn sealed_template() -> Public {
    Public {
        name_alg: HashAlgorithm::Sha256,
        attributes: TpmaObject::FIXED_TPM
            | TpmaObject::FIXED_PARENT
            | TpmaObject::USER_WITH_AUTH
            | TpmaObject::NO_DA,
        auth_policy: Vec::new(),
        detail: PublicDetail::KeyedHash {
            scheme: TpmAlgId::Null,
            unique: Vec::new(),
        },
    }
}

impl<T: Transport> TpmConnection<T> {
    /// Seal `data` under the parent named in `options`
    pub fn seal(
        &mut self,
        data: &[u8],
        owner_auth: &[u8],
        user_auth: &[u8],
        options: KeyOptions,
    ) -> KeyFileResult<TpmKey> {
        if data.len() > MAX_SEALED_DATA {
            return Err(KeyFileError::invalid_parameter(
                "data",
                &format!("at most {} bytes", MAX_SEALED_DATA),
                &format!("{} bytes", data.len()),
            ));
        }
        let parent = options.parent_handle();

        let (private, public) = self.with_parent(parent, owner_auth, |conn, resolved| {
            let command = Command::Create {
                parent: resolved.handle.clone(),
                in_sensitive: SensitiveCreate::new(user_auth, data),
                in_public: sealed_template(),
            };
            match conn.execute(command, Some(SessionEncryption::InOut), "seal")? {
                Response::Create { private, public } => Ok((private, public)),
                _ => Err(mismatch("TPM2_Create")),
            }
        })?;

        let key = TpmKey::from_device_blobs(
            KeyType::Sealed,
            public.marshal_2b()?,
            marshal_2b(&private)?,
            options.parent(parent).user_auth(user_auth),
        )?;
        log::info!("Sealed {} bytes under parent {}", data.len(), parent);
        Ok(key)
    }

    /// Recover the data held by a sealed key
    pub fn unseal(&mut self, key: &TpmKey, owner_auth: &[u8], user_auth: &[u8]) -> KeyFileResult<Zeroizing<Vec<u8>>> {
        if key.key_type() != KeyType::Sealed {
            return Err(KeyFileError::NotSealed {
                key_type: key.key_type().to_string(),
            });
        }
        self.with_parent(key.parent(), owner_auth, |conn, parent| {
            conn.with_loaded_key(parent, key, user_auth, |conn, item| {
                let command = Command::Unseal { item: item.clone() };
                match conn.execute(command, Some(SessionEncryption::InOut), "unseal")? {
                    Response::Unseal { data } => Ok(data.into_inner()),
                    _ => Err(mismatch("TPM2_Unseal")),
                }
            })
        })
    }
}
