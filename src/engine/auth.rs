//! Changing the auth value of a loadable key.

use zeroize::Zeroizing;

use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::TpmKey;
use crate::tpm::session::SessionEncryption;
use crate::tpm::structures::marshal_2b;
use crate::tpm::transport::{Command, Response, SecretBytes, Transport};

impl<T: Transport> TpmConnection<T> {
    /// Re-encrypt a key's private blob under a new auth value.
    ///
    /// The TPM returns a new private blob; the returned key carries it along
    /// with `new_auth`. The input key stays valid with `old_auth`.
    ///
    /// # Arguments
    ///
    /// * `key` - Loadable or legacy loadable key
    /// * `owner_auth` - Auth of the key's parent
    /// * `old_auth` - Current auth value of the key
    /// * `new_auth` - Auth value for the returned key, empty for none
    pub fn change_auth(
        &mut self,
        key: &TpmKey,
        owner_auth: &[u8],
        old_auth: &[u8],
        new_auth: &[u8],
    ) -> KeyFileResult<TpmKey> {
        if !key.key_type().is_loadable() {
            return Err(KeyFileError::NotLoadable {
                key_type: key.key_type().to_string(),
            });
        }

        let private = self.with_parent(key.parent(), owner_auth, |conn, parent| {
            conn.with_loaded_key(parent, key, old_auth, |conn, object| {
                let command = Command::ObjectChangeAuth {
                    object: object.clone(),
                    parent: parent.handle.handle,
                    new_auth: SecretBytes::new(new_auth),
                };
                match conn.execute(command, Some(SessionEncryption::InOut), "change_auth")? {
                    Response::ObjectChangeAuth { private } => Ok(private),
                    _ => Err(mismatch("TPM2_ObjectChangeAuth")),
                }
            })
        })?;

        let mut changed = key.with_private(key.key_type(), marshal_2b(&private)?);
        changed.user_auth = Zeroizing::new(new_auth.to_vec());
        changed.empty_auth = new_auth.is_empty();
        log::info!("Changed auth value of {} key under parent {}", key.key_type(), key.parent());
        Ok(changed)
    }
}
