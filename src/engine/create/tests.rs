use super::*;
use crate::engine::testing::{
    curves_reply, ecc_key_public, persistent_reply, rsa_key_public, srk_reply, RecordingTransport,
    PERSISTENT_PARENT, SRK_HANDLE,
};
use crate::tpm::structures::TpmHandle;

fn create_reply(public: Public) -> Response {
    Response::Create {
        private: vec![0xbb; 20],
        public,
    }
}

#[test]
fn test_create_default_ecc_key() {
    let transport = RecordingTransport::new()
        .reply(curves_reply())
        .reply(srk_reply())
        .reply(create_reply(ecc_key_public()));
    let mut conn = TpmConnection::new(transport);

    let key = conn
        .create_loadable_key(KeyAlgorithm::Ecc, 0, b"", b"pw", KeyOptions::new().description("web"))
        .unwrap();

    assert_eq!(key.key_type(), KeyType::Loadable);
    assert_eq!(key.parent(), TpmHandle::OWNER);
    assert!(!key.empty_auth());
    assert_eq!(key.description(), Some("web"));
    assert_eq!(key.pubkey(), ecc_key_public().marshal_2b().unwrap().as_slice());
    assert_eq!(key.privkey(), marshal_2b(&[0xbb; 20]).unwrap().as_slice());
    assert!(key.has_signer());

    let transport = conn.transport();
    assert_eq!(
        transport.names(),
        vec!["TPM2_GetCapability", "TPM2_CreatePrimary", "TPM2_Create", "TPM2_FlushContext"]
    );
    assert_eq!(transport.flushed(), vec![SRK_HANDLE]);
    match &transport.commands[2].0 {
        Command::Create {
            parent,
            in_sensitive,
            in_public,
        } => {
            assert_eq!(parent.handle, SRK_HANDLE);
            assert_eq!(*in_sensitive, SensitiveCreate::new(b"pw", &[]));
            assert_eq!(*in_public, ecc_template(EccCurve::NistP256));
        }
        other => panic!("unexpected command: {other:?}"),
    }
    let session = transport.session_of("TPM2_Create").unwrap();
    assert_eq!(session.encryption, SessionEncryption::InOut);
}

#[test]
fn test_create_rsa_key_skips_curve_query() {
    let transport = RecordingTransport::new()
        .reply(srk_reply())
        .reply(create_reply(rsa_key_public()));
    let mut conn = TpmConnection::new(transport);

    let key = conn
        .create_loadable_key(KeyAlgorithm::Rsa, 2048, b"", b"", KeyOptions::new())
        .unwrap();
    assert!(key.empty_auth());
    assert_eq!(key.key_algorithm().unwrap(), KeyAlgorithm::Rsa);
    assert_eq!(key.key_size().unwrap(), 256);
    match &conn.transport().commands[1].0 {
        Command::Create { in_public, .. } => assert_eq!(*in_public, rsa_template(RSA_KEY_BITS)),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_unsupported_sizes_rejected_before_device() {
    let mut conn = TpmConnection::new(RecordingTransport::new());

    let err = conn
        .create_loadable_key(KeyAlgorithm::Rsa, 3072, b"", b"", KeyOptions::new())
        .unwrap_err();
    assert_eq!(err.error_type(), "UnsupportedKeySize");

    let err = conn
        .create_loadable_key(KeyAlgorithm::Ecc, 512, b"", b"", KeyOptions::new())
        .unwrap_err();
    assert_eq!(err.error_type(), "UnsupportedKeySize");

    assert!(conn.transport().commands.is_empty());
}

#[test]
fn test_curve_missing_from_tpm() {
    let transport = RecordingTransport::new().reply(Response::EccCurves { curves: vec![0x0003] });
    let mut conn = TpmConnection::new(transport);

    let err = conn
        .create_loadable_key(KeyAlgorithm::Ecc, 384, b"", b"", KeyOptions::new())
        .unwrap_err();
    match err {
        KeyFileError::UnsupportedKeySize { bits, .. } => assert_eq!(bits, 384),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.transport().names(), vec!["TPM2_GetCapability"]);
}

#[test]
fn test_create_under_persistent_parent() {
    let transport = RecordingTransport::new()
        .reply(curves_reply())
        .reply(persistent_reply())
        .reply(create_reply(ecc_key_public()));
    let mut conn = TpmConnection::new(transport);

    let key = conn
        .create_loadable_key(
            KeyAlgorithm::Ecc,
            256,
            b"parent-pw",
            b"",
            KeyOptions::new().parent(PERSISTENT_PARENT),
        )
        .unwrap();
    assert_eq!(key.parent(), PERSISTENT_PARENT);
    assert!(conn.transport().flushed().is_empty());
    match &conn.transport().commands[2].0 {
        Command::Create { parent, .. } => {
            assert_eq!(parent.handle, PERSISTENT_PARENT);
            assert_eq!(&parent.auth[..], b"parent-pw");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
