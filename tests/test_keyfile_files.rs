// Key files as they are exchanged with other tools: DER and PEM on disk

mod common;

use std::fs;

use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use tempfile::tempdir;

use common::{connection, sha256, OWNER_AUTH};
use tpm_keyfile::engine::verify_signature;
use tpm_keyfile::prelude::*;

fn policy_strategy() -> impl Strategy<Value = Vec<TpmPolicy>> {
    vec(
        (any::<u32>(), vec(any::<u8>(), 0..48)).prop_map(|(command_code, command_policy)| TpmPolicy {
            command_code,
            command_policy,
        }),
        0..4,
    )
}

fn auth_policy_strategy() -> impl Strategy<Value = Vec<AuthPolicy>> {
    vec(
        (option::of("[a-z][a-z0-9-]{0,15}"), policy_strategy())
            .prop_filter("branches need a policy", |(_, policy)| !policy.is_empty())
            .prop_map(|(name, policy)| AuthPolicy { name, policy }),
        0..3,
    )
}

fn key_strategy() -> impl Strategy<Value = TpmKey> {
    (
        vec(any::<u8>(), 1..200),
        vec(any::<u8>(), 1..200),
        any::<u32>(),
        option::of("[a-zA-Z0-9 ._-]{0,40}"),
        policy_strategy(),
        auth_policy_strategy(),
        vec(any::<u8>(), 0..8),
    )
        .prop_map(
            |(pubkey, privkey, parent, description, policy, auth_policy, user_auth)| {
                let mut options = KeyOptions::new()
                    .pubkey(pubkey)
                    .privkey(privkey)
                    .parent(TpmHandle(parent))
                    .policy(policy)
                    .auth_policy(auth_policy)
                    .user_auth(&user_auth);
                if let Some(description) = description {
                    options = options.description(description);
                }
                options.build().unwrap()
            },
        )
}

proptest! {
    #[test]
    fn prop_key_file_roundtrip(key in key_strategy()) {
        let der = key.to_der().unwrap();
        prop_assert_eq!(&TpmKey::from_der(&der).unwrap(), &key);

        let pem = key.to_pem().unwrap();
        let parsed = TpmKey::from_pem(pem.as_bytes()).unwrap();
        prop_assert_eq!(&parsed, &key);
        prop_assert_eq!(parsed.to_der().unwrap(), der);
    }

    #[test]
    fn prop_parser_never_panics(bytes in vec(any::<u8>(), 0..512)) {
        let _ = TpmKey::from_der(&bytes);
    }
}

#[test]
fn test_key_files_on_disk() {
    let dir = tempdir().unwrap();
    let mut conn = connection();

    let signing = conn
        .create_loadable_key(
            KeyAlgorithm::Ecc,
            0,
            OWNER_AUTH,
            b"pin",
            KeyOptions::new().description("disk key"),
        )
        .unwrap();
    let sealed = conn
        .seal(b"database password", OWNER_AUTH, b"", KeyOptions::new())
        .unwrap();

    let signing_path = dir.path().join("signing.pem");
    let sealed_path = dir.path().join("sealed.der");
    fs::write(&signing_path, signing.to_pem().unwrap()).unwrap();
    fs::write(&sealed_path, sealed.to_der().unwrap()).unwrap();

    let signing = TpmKey::from_pem(&fs::read(&signing_path).unwrap()).unwrap();
    let sealed = TpmKey::from_der(&fs::read(&sealed_path).unwrap()).unwrap();
    assert_eq!(signing.description(), Some("disk key"));
    assert!(!signing.empty_auth());
    assert_eq!(sealed.key_type(), KeyType::Sealed);
    assert!(sealed.empty_auth());

    let digest = sha256(b"from disk");
    let signature = conn
        .sign_asn1(
            &signing,
            OWNER_AUTH,
            b"pin",
            &digest,
            HashAlgorithm::Sha256,
            SignatureScheme::Default,
        )
        .unwrap();
    assert!(verify_signature(
        &signing.public_key().unwrap(),
        &digest,
        HashAlgorithm::Sha256,
        SignatureScheme::Default,
        &signature
    ));
    assert_eq!(
        conn.unseal(&sealed, OWNER_AUTH, b"").unwrap().as_slice(),
        b"database password"
    );
}

#[test]
fn test_pem_with_surrounding_text() {
    let key = KeyOptions::new()
        .pubkey(vec![0x00, 0x02, 0xaa, 0xbb])
        .privkey(vec![0x00, 0x02, 0xcc, 0xdd])
        .build()
        .unwrap();
    let text = format!("key for host a.example\n\n{}\n", key.to_pem().unwrap());

    let dir = tempdir().unwrap();
    let path = dir.path().join("annotated.pem");
    fs::write(&path, text).unwrap();
    assert_eq!(TpmKey::from_pem(&fs::read(&path).unwrap()).unwrap(), key);
}

#[test]
fn test_other_pem_blocks_rejected() {
    let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", vec![0x30, 0x00]));
    let err = TpmKey::from_pem(pem.as_bytes()).unwrap_err();
    assert_eq!(err.error_type(), "NotAKeyFile");
}
