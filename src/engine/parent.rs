/*!
 * Parent resolution
 *
 * Key files name their parent by handle. Permanent hierarchy handles get an
 * ephemeral storage root key created under them from the standard ECC P-256
 * template; persistent handles are used directly. Either way the session
 * used for the following commands is salted to the parent's public key.
 */

use crate::config::TransientParentPolicy;
use crate::engine::connection::{mismatch, TpmConnection};
use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{KeyType, TpmKey};
use crate::tpm::session::{SaltKey, SessionEncryption};
use crate::tpm::structures::{
    unmarshal_2b, EccCurve, EccPoint, HandleType, HashAlgorithm, TpmaObject, Public,
    PublicDetail, TpmAlgId, SensitiveCreate, SymmetricObject, TpmHandle,
};
use crate::tpm::transport::{AuthHandle, Command, Response, Transport};

/// Storage root key template: ECC P-256 restricted decryption key with
/// AES-128-CFB protection, as in the TCG provisioning guidance
pub fn srk_template() -> Public {
    Public {
        name_alg: HashAlgorithm::Sha256,
        attributes: TpmaObject::FIXED_TPM
            | TpmaObject::FIXED_PARENT
            | TpmaObject::SENSITIVE_DATA_ORIGIN
            | TpmaObject::USER_WITH_AUTH
            | TpmaObject::NO_DA
            | TpmaObject::RESTRICTED
            | TpmaObject::DECRYPT,
        auth_policy: Vec::new(),
        detail: PublicDetail::Ecc {
            symmetric: SymmetricObject::aes_128_cfb(),
            scheme: TpmAlgId::Null,
            curve: EccCurve::NistP256,
            point: EccPoint::default(),
        },
    }
}

/// A parent ready to authorize child commands
#[derive(Debug, Clone)]
pub struct ResolvedParent {
    pub handle: AuthHandle,
    pub public: Public,
    /// Created for this operation and flushed when it ends
    pub ephemeral: bool,
}

impl<T: Transport> TpmConnection<T> {
    /// Resolve a key file's parent handle into a usable parent.
    ///
    /// # Arguments
    ///
    /// * `parent` - Parent handle from the key file
    /// * `owner_auth` - Hierarchy password, or the persistent key's auth
    pub fn resolve_parent(&mut self, parent: TpmHandle, owner_auth: &[u8]) -> KeyFileResult<ResolvedParent> {
        match parent.handle_type() {
            HandleType::Permanent => self.create_srk(parent, owner_auth),
            HandleType::Transient => match self.config().transient_parent {
                TransientParentPolicy::FallbackToOwner => {
                    log::warn!(
                        "Key file names transient parent {}; using a storage root key under the owner hierarchy",
                        parent
                    );
                    self.create_srk(TpmHandle::OWNER, owner_auth)
                }
                TransientParentPolicy::Reject => Err(KeyFileError::invalid_parameter(
                    "parent",
                    "a permanent or persistent handle",
                    &format!("transient handle {}", parent),
                )),
            },
            HandleType::Persistent => {
                let (public, name) = self.read_public(parent)?;
                self.set_salt(Some(SaltKey {
                    handle: parent,
                    public: public.clone(),
                }));
                Ok(ResolvedParent {
                    handle: AuthHandle::new(parent, name, owner_auth),
                    public,
                    ephemeral: false,
                })
            }
            HandleType::Other(_) => Err(KeyFileError::invalid_parameter(
                "parent",
                "a permanent or persistent handle",
                &parent.to_string(),
            )),
        }
    }

    fn create_srk(&mut self, hierarchy: TpmHandle, owner_auth: &[u8]) -> KeyFileResult<ResolvedParent> {
        let command = Command::CreatePrimary {
            hierarchy: AuthHandle::permanent(hierarchy, owner_auth),
            in_sensitive: SensitiveCreate::default(),
            in_public: srk_template(),
        };
        match self.execute(command, None, "resolve_parent")? {
            Response::CreatePrimary { handle, public, name } => {
                log::debug!("Created storage root key {} under {}", handle, hierarchy);
                self.set_salt(Some(SaltKey {
                    handle,
                    public: public.clone(),
                }));
                Ok(ResolvedParent {
                    handle: AuthHandle::new(handle, name, &[]),
                    public,
                    ephemeral: true,
                })
            }
            _ => Err(mismatch("TPM2_CreatePrimary")),
        }
    }

    pub(crate) fn read_public(&mut self, object: TpmHandle) -> KeyFileResult<(Public, Vec<u8>)> {
        match self.execute(Command::ReadPublic { object }, None, "read_public")? {
            Response::ReadPublic { public, name } => Ok((public, name)),
            _ => Err(mismatch("TPM2_ReadPublic")),
        }
    }

    /// Drop the session salt and flush the parent if it was created here
    pub fn release_parent(&mut self, parent: &ResolvedParent) {
        if self.salt().map(|salt| salt.handle) == Some(parent.handle.handle) {
            self.set_salt(None);
        }
        if parent.ephemeral {
            self.flush(parent.handle.handle);
        }
    }

    /// Resolve `parent`, run `f` with it and release it on every path
    pub fn with_parent<R, F>(&mut self, parent: TpmHandle, owner_auth: &[u8], f: F) -> KeyFileResult<R>
    where
        F: FnOnce(&mut Self, &ResolvedParent) -> KeyFileResult<R>,
    {
        let resolved = self.resolve_parent(parent, owner_auth)?;
        let result = f(self, &resolved);
        self.release_parent(&resolved);
        result
    }

    /// Load `key` under a resolved parent, run `f` with the loaded object and
    /// flush it on every path
    pub fn with_loaded_key<R, F>(
        &mut self,
        parent: &ResolvedParent,
        key: &TpmKey,
        user_auth: &[u8],
        f: F,
    ) -> KeyFileResult<R>
    where
        F: FnOnce(&mut Self, &AuthHandle) -> KeyFileResult<R>,
    {
        let object = self.load(parent, key, user_auth)?;
        self.with_temporary_handle(object.handle, |conn| f(conn, &object))
    }

    fn load(&mut self, parent: &ResolvedParent, key: &TpmKey, user_auth: &[u8]) -> KeyFileResult<AuthHandle> {
        if !key.key_type().is_loadable() && key.key_type() != KeyType::Sealed {
            return Err(KeyFileError::NotLoadable {
                key_type: key.key_type().to_string(),
            });
        }
        let in_private = unmarshal_2b(key.privkey(), "TPM2B_PRIVATE")?;
        let command = Command::Load {
            parent: parent.handle.clone(),
            in_private,
            in_public: key.public()?,
        };
        match self.execute(command, Some(SessionEncryption::InOut), "load")? {
            Response::Load { handle, name } => Ok(AuthHandle::new(handle, name, user_auth)),
            _ => Err(mismatch("TPM2_Load")),
        }
    }

    /// Public area of a parent, for wrapping keys offline against it
    pub fn parent_public(&mut self, parent: TpmHandle, owner_auth: &[u8]) -> KeyFileResult<Public> {
        self.with_parent(parent, owner_auth, |_, resolved| Ok(resolved.public.clone()))
    }
}
