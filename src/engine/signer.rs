/*!
 * Signer surface
 *
 * [`TpmKeySigner`] binds a key file to a shared TPM connection so that it can
 * be handed to code that only knows how to ask for signatures. Auth values are
 * not stored; they are fetched from caller-supplied closures each time a
 * signature is produced. The connection mutex serializes all commands sent
 * through one transport.
 *
 * An importable key is imported on the first signature and the resulting
 * loadable key is reused afterwards.
 */

use std::fmt;
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::engine::connection::TpmConnection;
use crate::engine::sign::SignatureScheme;
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyType, PublicKey, TpmKey};
use crate::tpm::structures::HashAlgorithm;
use crate::tpm::transport::Transport;

/// Supplies the parent (owner) auth value at signing time
pub type AuthProvider = Box<dyn Fn() -> KeyFileResult<Zeroizing<Vec<u8>>> + Send + Sync>;

/// Supplies the key's own auth value at signing time
pub type KeyAuthProvider = Box<dyn Fn(&TpmKey) -> KeyFileResult<Zeroizing<Vec<u8>>> + Send + Sync>;

/// A key file usable as a signer
pub struct TpmKeySigner<T: Transport> {
    connection: Arc<Mutex<TpmConnection<T>>>,
    key: TpmKey,
    imported: Mutex<Option<TpmKey>>,
    public_key: PublicKey,
    owner_auth: AuthProvider,
    user_auth: KeyAuthProvider,
}

impl<T: Transport> TpmKeySigner<T> {
    /// Bind `key` to `connection`.
    ///
    /// Fails without touching the TPM when the key cannot sign.
    ///
    /// # Arguments
    ///
    /// * `connection` - Shared TPM connection
    /// * `key` - Loadable, legacy loadable or importable key with the sign attribute
    /// * `owner_auth` - Called for the parent auth on every signature
    /// * `user_auth` - Called for the key auth on every signature
    pub fn new(
        connection: Arc<Mutex<TpmConnection<T>>>,
        key: TpmKey,
        owner_auth: AuthProvider,
        user_auth: KeyAuthProvider,
    ) -> KeyFileResult<Self> {
        if !key.key_type().is_loadable() && key.key_type() != KeyType::Importable {
            return Err(KeyFileError::NotSignable {
                key_type: key.key_type().to_string(),
            });
        }
        if !key.has_signer() {
            return Err(KeyFileError::NoSignerCapability);
        }
        let public_key = key.public_key()?;
        Ok(TpmKeySigner {
            connection,
            key,
            imported: Mutex::new(None),
            public_key,
            owner_auth,
            user_auth,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn key(&self) -> &TpmKey {
        &self.key
    }

    /// Sign `digest` and return the signature in ASN.1 (ECDSA) or raw (RSA) form
    pub fn sign_digest(
        &self,
        digest: &[u8],
        hash: HashAlgorithm,
        scheme: SignatureScheme,
    ) -> KeyFileResult<Vec<u8>> {
        let owner_auth = (self.owner_auth)()?;
        let user_auth = (self.user_auth)(&self.key)?;
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| KeyFileError::LockPoisoned)?;
        let imported = self.loadable_key(&mut connection, &owner_auth)?;
        let key = imported.as_ref().unwrap_or(&self.key);
        connection.sign_asn1(key, &owner_auth, &user_auth, digest, hash, scheme)
    }

    /// The imported form of an importable key, imported at most once
    fn loadable_key(
        &self,
        connection: &mut TpmConnection<T>,
        owner_auth: &[u8],
    ) -> KeyFileResult<Option<TpmKey>> {
        if self.key.key_type() != KeyType::Importable {
            return Ok(None);
        }
        let mut imported = self.imported.lock().map_err(|_| KeyFileError::LockPoisoned)?;
        if imported.is_none() {
            let key = connection.import_key(&self.key, owner_auth)?;
            log::debug!("Cached imported key for signer under parent {}", key.parent());
            *imported = Some(key);
        }
        Ok(imported.clone())
    }
}

impl<T: Transport> fmt::Debug for TpmKeySigner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpmKeySigner")
            .field("key", &self.key)
            .field("public_key", &self.public_key.algorithm())
            .finish_non_exhaustive()
    }
}
