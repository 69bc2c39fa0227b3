//! A software TPM for integration tests.
//!
//! Implements the commands the engine issues with real P-256 arithmetic.
//! Private blobs use the same outer protection as a duplication blob (KDFa
//! derived AES-128-CFB plus an HMAC over the ciphertext and object name),
//! keyed by the parent's private scalar. Primary keys are derived from a
//! fixed seed, so re-creating a storage root key yields the same key.
//! RSA objects are not supported.

use std::collections::BTreeMap;

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::elliptic_curve::group::Curve;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use tpm_keyfile::engine::srk_template;
use tpm_keyfile::tpm::kdf::{kdfa, kdfe, pad_to_curve_size};
use tpm_keyfile::tpm::structures::marshal_digest;
use tpm_keyfile::tpm::{
    AuthHandle, Command, EccCurve, EccPoint, HandleType, HashAlgorithm, Public, PublicDetail,
    Response, ResponseCode, SecretBytes, Sensitive, SensitiveComposite, Session, SigScheme,
    Signature, TpmHandle, TpmaObject, Transport,
};

type HmacSha256 = Hmac<Sha256>;

const RC_ATTRIBUTES: ResponseCode = ResponseCode(0x082);
const RC_HIERARCHY: ResponseCode = ResponseCode(0x085);
const RC_TYPE: ResponseCode = ResponseCode(0x08a);
const RC_SCHEME: ResponseCode = ResponseCode(0x092);
const RC_KEY: ResponseCode = ResponseCode(0x09c);
const RC_BINDING: ResponseCode = ResponseCode(0x0a5);
const RC_ECC_POINT: ResponseCode = ResponseCode(0x0a7);
/// `TPM_RC_INTEGRITY` against parameter 1 (`inPrivate`)
const RC_INTEGRITY_PRIVATE: ResponseCode = ResponseCode(0x1df);
/// `TPM_RC_INTEGRITY` against parameter 3 (`duplicate`)
pub const RC_INTEGRITY_DUPLICATE: ResponseCode = ResponseCode(0x3df);

const FIRST_TRANSIENT: u32 = 0x8000_0000;

#[derive(Clone)]
struct Object {
    public: Public,
    name: Vec<u8>,
    sensitive: Sensitive,
}

impl Object {
    fn new(public: Public, sensitive: Sensitive) -> Result<Self, ResponseCode> {
        let name = public.name().map_err(|_| ResponseCode::VALUE)?;
        let object = Object {
            public,
            name,
            sensitive,
        };
        object.check_binding()?;
        Ok(object)
    }

    fn ecc_key(&self) -> Result<p256::SecretKey, ResponseCode> {
        match &self.sensitive.composite {
            SensitiveComposite::Ecc(d) => p256::SecretKey::from_slice(d).map_err(|_| RC_KEY),
            _ => Err(RC_TYPE),
        }
    }

    /// Public and sensitive areas must describe the same key
    fn check_binding(&self) -> Result<(), ResponseCode> {
        match (&self.public.detail, &self.sensitive.composite) {
            (PublicDetail::Ecc { curve, point, .. }, SensitiveComposite::Ecc(_)) => {
                if *curve != EccCurve::NistP256 {
                    return Err(ResponseCode::VALUE);
                }
                let expected = self.ecc_key()?.public_key().to_encoded_point(false);
                let actual = point.to_sec1(EccCurve::NistP256).map_err(|_| RC_BINDING)?;
                if actual != expected.as_bytes() {
                    return Err(RC_BINDING);
                }
                Ok(())
            }
            (PublicDetail::KeyedHash { .. }, SensitiveComposite::Bits(_)) => Ok(()),
            _ => Err(RC_TYPE),
        }
    }

    fn is_storage_key(&self) -> bool {
        self.public.attributes.contains(TpmaObject::RESTRICTED)
            && self.public.attributes.contains(TpmaObject::DECRYPT)
    }

    /// Key material protecting this object's children
    fn storage_seed(&self) -> Result<Zeroizing<Vec<u8>>, ResponseCode> {
        if !self.is_storage_key() {
            return Err(RC_TYPE);
        }
        Ok(Zeroizing::new(self.ecc_key()?.to_bytes().to_vec()))
    }

    fn public_x(&self) -> Result<Vec<u8>, ResponseCode> {
        match &self.public.detail {
            PublicDetail::Ecc { point, .. } => {
                pad_to_curve_size(EccCurve::NistP256, &point.x).map_err(|_| ResponseCode::VALUE)
            }
            _ => Err(RC_TYPE),
        }
    }
}

fn with_point(mut public: Public, key: &p256::SecretKey) -> Result<Public, ResponseCode> {
    let point = EccPoint::from_sec1(EccCurve::NistP256, key.public_key().to_encoded_point(false).as_bytes())
        .map_err(|_| ResponseCode::VALUE)?;
    match &mut public.detail {
        PublicDetail::Ecc {
            curve: EccCurve::NistP256,
            point: unique,
            ..
        } => *unique = point,
        _ => return Err(ResponseCode::VALUE),
    }
    Ok(public)
}

/// Outer protection: `TPM2B_DIGEST(hmac) || AES-128-CFB(sens2B)`
fn protect(seed: &[u8], name: &[u8], sensitive: &Sensitive) -> Result<Vec<u8>, ResponseCode> {
    let mut encrypted = sensitive.marshal_2b().map_err(|_| ResponseCode::VALUE)?.to_vec();
    let storage_key = kdfa(seed, "STORAGE", name, &[], 128).map_err(|_| ResponseCode::VALUE)?;
    cfb_mode::Encryptor::<Aes128>::new_from_slices(&storage_key, &[0u8; 16])
        .map_err(|_| ResponseCode::VALUE)?
        .encrypt(&mut encrypted);

    let integrity_key = kdfa(seed, "INTEGRITY", &[], &[], 256).map_err(|_| ResponseCode::VALUE)?;
    let mut mac = HmacSha256::new_from_slice(&integrity_key).map_err(|_| ResponseCode::VALUE)?;
    mac.update(&encrypted);
    mac.update(name);

    let mut out = marshal_digest(&mac.finalize().into_bytes()).map_err(|_| ResponseCode::VALUE)?;
    out.extend_from_slice(&encrypted);
    Ok(out)
}

fn unprotect(seed: &[u8], name: &[u8], body: &[u8], integrity: ResponseCode) -> Result<Sensitive, ResponseCode> {
    if body.len() < 2 {
        return Err(integrity);
    }
    let hmac_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    if body.len() < 2 + hmac_len {
        return Err(integrity);
    }
    let (outer_hmac, encrypted) = body[2..].split_at(hmac_len);

    let integrity_key = kdfa(seed, "INTEGRITY", &[], &[], 256).map_err(|_| ResponseCode::VALUE)?;
    let mut mac = HmacSha256::new_from_slice(&integrity_key).map_err(|_| ResponseCode::VALUE)?;
    mac.update(encrypted);
    mac.update(name);
    mac.verify_slice(outer_hmac).map_err(|_| integrity)?;

    let mut plain = Zeroizing::new(encrypted.to_vec());
    let storage_key = kdfa(seed, "STORAGE", name, &[], 128).map_err(|_| ResponseCode::VALUE)?;
    cfb_mode::Decryptor::<Aes128>::new_from_slices(&storage_key, &[0u8; 16])
        .map_err(|_| ResponseCode::VALUE)?
        .decrypt(&mut plain);
    Sensitive::unmarshal_2b(&plain).map_err(|_| integrity)
}

/// In-memory TPM with an owner hierarchy, transient slots and persistent keys
pub struct SoftTpm {
    owner_auth: Vec<u8>,
    primary_seed: [u8; 32],
    transient: BTreeMap<u32, Object>,
    persistent: BTreeMap<u32, Object>,
    next_handle: u32,
    curves: Vec<u16>,
    log: Vec<(&'static str, Option<Session>)>,
}

impl SoftTpm {
    pub fn new(owner_auth: &[u8]) -> Self {
        SoftTpm {
            owner_auth: owner_auth.to_vec(),
            primary_seed: [0x5e; 32],
            transient: BTreeMap::new(),
            persistent: BTreeMap::new(),
            next_handle: FIRST_TRANSIENT,
            curves: vec![EccCurve::NistP256.curve_id()],
            log: Vec::new(),
        }
    }

    /// Make a P-256 storage key available at a persistent handle
    pub fn provision_persistent(&mut self, handle: TpmHandle, auth: &[u8]) -> Public {
        let key = p256::SecretKey::random(&mut OsRng);
        let public = with_point(srk_template(), &key).unwrap();
        let sensitive = Sensitive {
            auth_value: Zeroizing::new(auth.to_vec()),
            seed_value: Vec::new(),
            composite: SensitiveComposite::Ecc(Zeroizing::new(key.to_bytes().to_vec())),
        };
        let object = Object::new(public.clone(), sensitive).unwrap();
        self.persistent.insert(handle.value(), object);
        public
    }

    /// Transient handles currently occupied
    pub fn live_handles(&self) -> Vec<TpmHandle> {
        self.transient.keys().map(|&handle| TpmHandle(handle)).collect()
    }

    /// Names of all commands executed so far
    pub fn commands(&self) -> Vec<&'static str> {
        self.log.iter().map(|(name, _)| *name).collect()
    }

    /// Commands executed with their sessions
    pub fn sessions(&self) -> &[(&'static str, Option<Session>)] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn insert(&mut self, object: Object) -> TpmHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.transient.insert(handle, object);
        TpmHandle(handle)
    }

    fn object(&self, handle: TpmHandle) -> Result<Object, ResponseCode> {
        let object = match handle.handle_type() {
            HandleType::Transient => self.transient.get(&handle.value()),
            HandleType::Persistent => self.persistent.get(&handle.value()),
            _ => None,
        };
        object.cloned().ok_or(ResponseCode::HANDLE)
    }

    /// Check the name and auth value presented for an object
    fn authorize(&self, auth: &AuthHandle) -> Result<Object, ResponseCode> {
        let object = self.object(auth.handle)?;
        if object.name != auth.name {
            return Err(ResponseCode::HANDLE);
        }
        if object.sensitive.auth_value.as_slice() != &auth.auth[..] {
            return Err(ResponseCode::AUTH_FAIL);
        }
        Ok(object)
    }

    fn storage_parent(&self, auth: &AuthHandle) -> Result<Object, ResponseCode> {
        let parent = self.authorize(auth)?;
        if !parent.is_storage_key() {
            return Err(RC_TYPE);
        }
        Ok(parent)
    }

    fn authorize_hierarchy(&self, auth: &AuthHandle) -> Result<(), ResponseCode> {
        let expected: &[u8] = match auth.handle {
            TpmHandle::OWNER => &self.owner_auth,
            _ => return Err(RC_HIERARCHY),
        };
        if expected != &auth.auth[..] {
            return Err(ResponseCode::AUTH_FAIL);
        }
        Ok(())
    }

    fn create_primary(&mut self, hierarchy: &AuthHandle, template: &Public, user_auth: &[u8]) -> Result<Response, ResponseCode> {
        self.authorize_hierarchy(hierarchy)?;
        let mut material = hierarchy.handle.value().to_be_bytes().to_vec();
        material.extend_from_slice(&template.marshal().map_err(|_| ResponseCode::VALUE)?);
        let scalar = kdfa(&self.primary_seed, "PRIMARY", &material, &[], 256).map_err(|_| ResponseCode::VALUE)?;
        let key = p256::SecretKey::from_slice(&scalar).map_err(|_| RC_KEY)?;

        let public = with_point(template.clone(), &key)?;
        let sensitive = Sensitive {
            auth_value: Zeroizing::new(user_auth.to_vec()),
            seed_value: Vec::new(),
            composite: SensitiveComposite::Ecc(Zeroizing::new(key.to_bytes().to_vec())),
        };
        let object = Object::new(public.clone(), sensitive)?;
        let name = object.name.clone();
        let handle = self.insert(object);
        Ok(Response::CreatePrimary { handle, public, name })
    }

    fn create(&mut self, parent: &AuthHandle, template: &Public, user_auth: &[u8], data: &[u8]) -> Result<Response, ResponseCode> {
        let parent = self.storage_parent(parent)?;
        let (public, seed_value, composite) = match &template.detail {
            PublicDetail::Ecc {
                curve: EccCurve::NistP256,
                ..
            } => {
                let key = p256::SecretKey::random(&mut OsRng);
                (
                    with_point(template.clone(), &key)?,
                    Vec::new(),
                    SensitiveComposite::Ecc(Zeroizing::new(key.to_bytes().to_vec())),
                )
            }
            PublicDetail::KeyedHash { scheme, .. } => {
                let mut seed_value = vec![0u8; 32];
                OsRng.fill_bytes(&mut seed_value);
                let mut material = seed_value.clone();
                material.extend_from_slice(data);
                let public = Public {
                    detail: PublicDetail::KeyedHash {
                        scheme: *scheme,
                        unique: HashAlgorithm::Sha256.digest(&material),
                    },
                    ..template.clone()
                };
                (public, seed_value, SensitiveComposite::Bits(Zeroizing::new(data.to_vec())))
            }
            _ => return Err(ResponseCode::VALUE),
        };
        let sensitive = Sensitive {
            auth_value: Zeroizing::new(user_auth.to_vec()),
            seed_value,
            composite,
        };
        let object = Object::new(public.clone(), sensitive)?;
        let private = protect(&parent.storage_seed()?, &object.name, &object.sensitive)?;
        Ok(Response::Create { private, public })
    }

    fn load(&mut self, parent: &AuthHandle, in_private: &[u8], in_public: &Public) -> Result<Response, ResponseCode> {
        let parent = self.storage_parent(parent)?;
        let name = in_public.name().map_err(|_| ResponseCode::VALUE)?;
        let sensitive = unprotect(&parent.storage_seed()?, &name, in_private, RC_INTEGRITY_PRIVATE)?;
        let object = Object::new(in_public.clone(), sensitive)?;
        let handle = self.insert(object);
        Ok(Response::Load { handle, name })
    }

    fn import(&mut self, parent: &AuthHandle, object_public: &Public, duplicate: &[u8], in_sym_seed: &[u8]) -> Result<Response, ResponseCode> {
        let parent = self.storage_parent(parent)?;
        let parent_key = parent.ecc_key()?;

        let ephemeral_point = EccPoint::unmarshal(in_sym_seed).map_err(|_| RC_ECC_POINT)?;
        let ephemeral_sec1 = ephemeral_point.to_sec1(EccCurve::NistP256).map_err(|_| RC_ECC_POINT)?;
        let ephemeral = p256::PublicKey::from_sec1_bytes(&ephemeral_sec1).map_err(|_| RC_ECC_POINT)?;
        let shared = p256::ecdh::diffie_hellman(parent_key.to_nonzero_scalar(), ephemeral.as_affine());
        let ephemeral_x = pad_to_curve_size(EccCurve::NistP256, &ephemeral_point.x).map_err(|_| RC_ECC_POINT)?;
        let seed = kdfe(shared.raw_secret_bytes(), "DUPLICATE", &ephemeral_x, &parent.public_x()?, 256)
            .map_err(|_| ResponseCode::VALUE)?;

        let name = object_public.name().map_err(|_| ResponseCode::VALUE)?;
        let sensitive = unprotect(&seed, &name, duplicate, RC_INTEGRITY_DUPLICATE)?;
        let object = Object::new(object_public.clone(), sensitive)?;
        let private = protect(&parent.storage_seed()?, &name, &object.sensitive)?;
        Ok(Response::Import { private })
    }

    fn sign(&self, key: &AuthHandle, digest: &[u8], scheme: SigScheme) -> Result<Response, ResponseCode> {
        let object = self.authorize(key)?;
        if !object.public.can_sign() || object.is_storage_key() {
            return Err(RC_ATTRIBUTES);
        }
        let hash = match scheme {
            SigScheme::Ecdsa(hash) => hash,
            _ => return Err(RC_SCHEME),
        };
        if digest.len() != hash.digest_len() {
            return Err(ResponseCode::VALUE);
        }
        let signing_key = p256::ecdsa::SigningKey::from(&object.ecc_key()?);
        let signature: p256::ecdsa::Signature = signing_key.sign_prehash(digest).map_err(|_| ResponseCode::VALUE)?;
        let bytes = signature.to_bytes();
        Ok(Response::Sign {
            signature: Signature::Ecdsa {
                hash,
                r: bytes[..32].to_vec(),
                s: bytes[32..].to_vec(),
            },
        })
    }

    fn ecdh_zgen(&self, key: &AuthHandle, in_point: &EccPoint) -> Result<Response, ResponseCode> {
        let object = self.authorize(key)?;
        if !object.public.attributes.contains(TpmaObject::DECRYPT) || object.is_storage_key() {
            return Err(RC_ATTRIBUTES);
        }
        let secret = object.ecc_key()?;
        let peer_sec1 = in_point.to_sec1(EccCurve::NistP256).map_err(|_| RC_ECC_POINT)?;
        let peer = p256::PublicKey::from_sec1_bytes(&peer_sec1).map_err(|_| RC_ECC_POINT)?;
        let product = (peer.to_projective() * *secret.to_nonzero_scalar()).to_affine();
        let point = EccPoint::from_sec1(EccCurve::NistP256, product.to_encoded_point(false).as_bytes())
            .map_err(|_| RC_ECC_POINT)?;
        Ok(Response::EcdhZGen { point })
    }

    fn change_auth(&self, object: &AuthHandle, parent: TpmHandle, new_auth: &[u8]) -> Result<Response, ResponseCode> {
        let mut object = self.authorize(object)?;
        let parent = self.object(parent)?;
        object.sensitive.auth_value = Zeroizing::new(new_auth.to_vec());
        let private = protect(&parent.storage_seed()?, &object.name, &object.sensitive)?;
        Ok(Response::ObjectChangeAuth { private })
    }
}

impl Transport for SoftTpm {
    fn execute(&mut self, command: &Command, session: Option<&Session>) -> Result<Response, ResponseCode> {
        self.log.push((command.name(), session.cloned()));
        match command {
            Command::CreatePrimary {
                hierarchy,
                in_sensitive,
                in_public,
            } => self.create_primary(hierarchy, in_public, &in_sensitive.user_auth),
            Command::Create {
                parent,
                in_sensitive,
                in_public,
            } => self.create(parent, in_public, &in_sensitive.user_auth, &in_sensitive.data),
            Command::Load {
                parent,
                in_private,
                in_public,
            } => self.load(parent, in_private, in_public),
            Command::Import {
                parent,
                encryption_key,
                object_public,
                duplicate,
                in_sym_seed,
                symmetric,
            } => {
                if !encryption_key.is_empty() || !symmetric.is_null() {
                    return Err(ResponseCode::VALUE);
                }
                self.import(parent, object_public, duplicate, in_sym_seed)
            }
            Command::Sign { key, digest, scheme } => self.sign(key, digest, *scheme),
            Command::RsaDecrypt { .. } => Err(ResponseCode::COMMAND_CODE),
            Command::Unseal { item } => {
                let object = self.authorize(item)?;
                match &object.sensitive.composite {
                    SensitiveComposite::Bits(data) => Ok(Response::Unseal {
                        data: SecretBytes::new(data),
                    }),
                    _ => Err(RC_TYPE),
                }
            }
            Command::ObjectChangeAuth {
                object,
                parent,
                new_auth,
            } => self.change_auth(object, *parent, new_auth),
            Command::EcdhZGen { key, in_point } => self.ecdh_zgen(key, in_point),
            Command::ReadPublic { object } => {
                let object = self.object(*object)?;
                Ok(Response::ReadPublic {
                    public: object.public,
                    name: object.name,
                })
            }
            Command::FlushContext { handle } => match self.transient.remove(&handle.value()) {
                Some(_) => Ok(Response::FlushContext),
                None => Err(ResponseCode::HANDLE),
            },
            Command::GetEccCurves { .. } => Ok(Response::EccCurves {
                curves: self.curves.clone(),
            }),
        }
    }
}
