/*!
 * DER and PEM codec for TSS2 key files
 *
 * ```text
 * TPMKey ::= SEQUENCE {
 *     type        OBJECT IDENTIFIER,
 *     emptyAuth   [0] EXPLICIT BOOLEAN OPTIONAL,
 *     policy      [1] EXPLICIT SEQUENCE OF TPMPolicy OPTIONAL,
 *     secret      [2] EXPLICIT OCTET STRING OPTIONAL,
 *     authPolicy  [3] EXPLICIT SEQUENCE OF TPMAuthPolicy OPTIONAL,
 *     description [4] EXPLICIT UTF8String OPTIONAL,
 *     parent      INTEGER,
 *     pubkey      OCTET STRING,
 *     privkey     OCTET STRING }
 * ```
 */

use der::asn1::{AnyRef, ContextSpecific, ContextSpecificRef, ObjectIdentifier, OctetString};
use der::{
    Decode, DecodeValue, Encode, EncodeValue, ErrorKind, Header, Length, Reader, Sequence, Tag,
    TagMode, TagNumber, Writer,
};
use log::warn;
use pem::Pem;

use crate::error::{KeyFileError, KeyFileResult};
use crate::keyfile::key::{AuthPolicy, KeyType, TpmKey, TpmPolicy};
use crate::tpm::structures::TpmHandle;

/// PEM label of TSS2 key files
pub const PEM_LABEL: &str = "TSS2 PRIVATE KEY";

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct PolicyDer {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    command_code: u32,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT")]
    command_policy: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct AuthPolicyDer {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    name: Option<String>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT")]
    policy: Vec<PolicyDer>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct TpmKeyDer {
    key_type: ObjectIdentifier,
    empty_auth: bool,
    policy: Vec<PolicyDer>,
    secret: Option<OctetString>,
    auth_policy: Vec<AuthPolicyDer>,
    description: Option<String>,
    parent: u32,
    pubkey: OctetString,
    privkey: OctetString,
}

fn explicit<T>(tag_number: TagNumber, value: &T) -> ContextSpecificRef<'_, T> {
    ContextSpecificRef {
        tag_number,
        tag_mode: TagMode::Explicit,
        value,
    }
}

fn decode_explicit<'a, T: Decode<'a>, R: Reader<'a>>(
    reader: &mut R,
    tag_number: TagNumber,
) -> der::Result<T> {
    ContextSpecific::<T>::decode_explicit(reader, tag_number)?
        .map(|field| field.value)
        .ok_or_else(|| reader.error(ErrorKind::TagNumberInvalid))
}

impl TpmKeyDer {
    fn empty_auth_field(&self) -> Option<ContextSpecificRef<'_, bool>> {
        self.empty_auth
            .then(|| explicit(TagNumber::N0, &self.empty_auth))
    }

    fn policy_field(&self) -> Option<ContextSpecificRef<'_, Vec<PolicyDer>>> {
        (!self.policy.is_empty()).then(|| explicit(TagNumber::N1, &self.policy))
    }

    fn secret_field(&self) -> Option<ContextSpecificRef<'_, OctetString>> {
        self.secret
            .as_ref()
            .map(|secret| explicit(TagNumber::N2, secret))
    }

    fn auth_policy_field(&self) -> Option<ContextSpecificRef<'_, Vec<AuthPolicyDer>>> {
        (!self.auth_policy.is_empty()).then(|| explicit(TagNumber::N3, &self.auth_policy))
    }

    fn description_field(&self) -> Option<ContextSpecificRef<'_, String>> {
        self.description
            .as_ref()
            .map(|description| explicit(TagNumber::N4, description))
    }
}

impl<'a> DecodeValue<'a> for TpmKeyDer {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            let key_type = reader.decode()?;
            let mut empty_auth = false;
            let mut policy = Vec::new();
            let mut secret = None;
            let mut auth_policy = Vec::new();
            let mut description = None;

            // Context fields must appear in strictly ascending tag order
            let mut last_tag: Option<u8> = None;
            while let Some(octet) = reader.peek_byte() {
                let tag = Tag::try_from(octet)?;
                if !tag.is_context_specific() {
                    break;
                }
                let number = tag.number();
                if last_tag.is_some_and(|last| number.value() <= last) {
                    return Err(ErrorKind::TagUnexpected {
                        expected: None,
                        actual: tag,
                    }
                    .into());
                }
                last_tag = Some(number.value());
                match number.value() {
                    0 => empty_auth = decode_explicit(reader, number)?,
                    1 => policy = decode_explicit(reader, number)?,
                    2 => secret = Some(decode_explicit(reader, number)?),
                    3 => auth_policy = decode_explicit(reader, number)?,
                    4 => description = Some(decode_explicit(reader, number)?),
                    _ => {
                        let field: AnyRef<'a> = reader.decode()?;
                        warn!(
                            "Discarding unknown key file field [{}] ({} bytes)",
                            number.value(),
                            field.value().len()
                        );
                    }
                }
            }

            Ok(TpmKeyDer {
                key_type,
                empty_auth,
                policy,
                secret,
                auth_policy,
                description,
                parent: reader.decode()?,
                pubkey: reader.decode()?,
                privkey: reader.decode()?,
            })
        })
    }
}

impl EncodeValue for TpmKeyDer {
    fn value_len(&self) -> der::Result<Length> {
        self.key_type.encoded_len()?
            + self.empty_auth_field().encoded_len()?
            + self.policy_field().encoded_len()?
            + self.secret_field().encoded_len()?
            + self.auth_policy_field().encoded_len()?
            + self.description_field().encoded_len()?
            + self.parent.encoded_len()?
            + self.pubkey.encoded_len()?
            + self.privkey.encoded_len()?
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        self.key_type.encode(writer)?;
        self.empty_auth_field().encode(writer)?;
        self.policy_field().encode(writer)?;
        self.secret_field().encode(writer)?;
        self.auth_policy_field().encode(writer)?;
        self.description_field().encode(writer)?;
        self.parent.encode(writer)?;
        self.pubkey.encode(writer)?;
        self.privkey.encode(writer)?;
        Ok(())
    }
}

impl<'a> Sequence<'a> for TpmKeyDer {}

impl PolicyDer {
    fn from_policy(policy: &TpmPolicy) -> KeyFileResult<Self> {
        Ok(PolicyDer {
            command_code: policy.command_code,
            command_policy: OctetString::new(policy.command_policy.clone())?,
        })
    }

    fn into_policy(self) -> TpmPolicy {
        TpmPolicy {
            command_code: self.command_code,
            command_policy: self.command_policy.into_bytes(),
        }
    }
}

fn policies_to_der(policies: &[TpmPolicy]) -> KeyFileResult<Vec<PolicyDer>> {
    policies.iter().map(PolicyDer::from_policy).collect()
}

impl TpmKeyDer {
    fn from_key(key: &TpmKey) -> KeyFileResult<Self> {
        let auth_policy = key
            .auth_policy
            .iter()
            .map(|branch| {
                Ok(AuthPolicyDer {
                    name: branch.name.clone(),
                    policy: policies_to_der(&branch.policy)?,
                })
            })
            .collect::<KeyFileResult<Vec<_>>>()?;
        let secret = if key.secret.is_empty() {
            None
        } else {
            Some(OctetString::new(key.secret.clone())?)
        };
        Ok(TpmKeyDer {
            key_type: key.key_type.oid(),
            empty_auth: key.empty_auth,
            policy: policies_to_der(&key.policy)?,
            secret,
            auth_policy,
            description: key.description.clone(),
            parent: key.parent.value(),
            pubkey: OctetString::new(key.pubkey.clone())?,
            privkey: OctetString::new(key.privkey.clone())?,
        })
    }

    fn into_key(self) -> KeyFileResult<TpmKey> {
        let mut key = TpmKey::blank();
        key.key_type = KeyType::from_oid(&self.key_type)?;
        key.empty_auth = self.empty_auth;
        key.policy = self.policy.into_iter().map(PolicyDer::into_policy).collect();
        key.secret = self.secret.map(OctetString::into_bytes).unwrap_or_default();
        key.auth_policy = self
            .auth_policy
            .into_iter()
            .map(|branch| AuthPolicy {
                name: branch.name,
                policy: branch.policy.into_iter().map(PolicyDer::into_policy).collect(),
            })
            .collect();
        key.description = self.description;
        key.parent = TpmHandle(self.parent);
        key.pubkey = self.pubkey.into_bytes();
        key.privkey = self.privkey.into_bytes();
        key.validate()
            .map_err(|e| KeyFileError::format("TSS2 key file", &e.to_string()))?;
        Ok(key)
    }
}

impl TpmKey {
    /// Parse a DER-encoded key file
    pub fn from_der(bytes: &[u8]) -> KeyFileResult<Self> {
        TpmKeyDer::from_der(bytes)?.into_key()
    }

    /// Encode the key file as DER
    pub fn to_der(&self) -> KeyFileResult<Vec<u8>> {
        Ok(TpmKeyDer::from_key(self)?.to_der()?)
    }

    /// Parse a PEM block labelled `TSS2 PRIVATE KEY`
    pub fn from_pem(bytes: &[u8]) -> KeyFileResult<Self> {
        let block = pem::parse(bytes)?;
        if block.tag() != PEM_LABEL {
            return Err(KeyFileError::NotAKeyFile {
                label: block.tag().to_string(),
            });
        }
        Self::from_der(block.contents())
    }

    pub fn to_pem(&self) -> KeyFileResult<String> {
        Ok(pem::encode(&Pem::new(PEM_LABEL, self.to_der()?)))
    }
}
