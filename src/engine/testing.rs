//! Scripted transport and fixtures for engine unit tests.

use std::collections::VecDeque;

use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::engine::create::{ecc_template, rsa_template};
use crate::engine::parent::srk_template;
use crate::keyfile::key::{KeyOptions, KeyType, TpmKey};
use crate::tpm::session::Session;
use crate::tpm::structures::{marshal_2b, EccCurve, EccPoint, Public, PublicDetail, TpmHandle};
use crate::tpm::transport::{Command, Response, ResponseCode, Transport};

pub(crate) const SRK_HANDLE: TpmHandle = TpmHandle(0x8000_0000);
pub(crate) const KEY_HANDLE: TpmHandle = TpmHandle(0x8000_0001);
pub(crate) const PERSISTENT_PARENT: TpmHandle = TpmHandle(0x8100_0001);

/// Replays scripted responses and records every command it is given.
/// `TPM2_FlushContext` always succeeds without consuming a reply.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub commands: Vec<(Command, Option<Session>)>,
    replies: VecDeque<Result<Response, ResponseCode>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, response: Response) -> Self {
        self.replies.push_back(Ok(response));
        self
    }

    pub fn fail(mut self, rc: ResponseCode) -> Self {
        self.replies.push_back(Err(rc));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|(command, _)| command.name()).collect()
    }

    pub fn flushed(&self) -> Vec<TpmHandle> {
        self.commands
            .iter()
            .filter_map(|(command, _)| match command {
                Command::FlushContext { handle } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn session_of(&self, name: &str) -> Option<Session> {
        self.commands
            .iter()
            .find(|(command, _)| command.name() == name)
            .and_then(|(_, session)| session.clone())
    }

    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for RecordingTransport {
    fn execute(&mut self, command: &Command, session: Option<&Session>) -> Result<Response, ResponseCode> {
        self.commands.push((command.clone(), session.cloned()));
        if let Command::FlushContext { .. } = command {
            return Ok(Response::FlushContext);
        }
        self.replies
            .pop_front()
            .unwrap_or(Err(ResponseCode::COMMAND_CODE))
    }
}

fn p256_point(secret: u8) -> EccPoint {
    let key = p256::SecretKey::from_slice(&[secret; 32]).unwrap();
    EccPoint::from_sec1(EccCurve::NistP256, key.public_key().to_encoded_point(false).as_bytes()).unwrap()
}

fn with_point(mut public: Public, secret: u8) -> Public {
    if let PublicDetail::Ecc { point, .. } = &mut public.detail {
        *point = p256_point(secret);
    }
    public
}

/// Storage root key public area with a real P-256 point
pub(crate) fn srk_public() -> Public {
    with_point(srk_template(), 5)
}

pub(crate) fn srk_reply() -> Response {
    let public = srk_public();
    let name = public.name().unwrap();
    Response::CreatePrimary {
        handle: SRK_HANDLE,
        public,
        name,
    }
}

pub(crate) fn persistent_reply() -> Response {
    let public = srk_public();
    let name = public.name().unwrap();
    Response::ReadPublic { public, name }
}

pub(crate) fn load_reply() -> Response {
    Response::Load {
        handle: KEY_HANDLE,
        name: vec![0x00, 0x0b, 0x42],
    }
}

pub(crate) fn curves_reply() -> Response {
    Response::EccCurves {
        curves: vec![0x0003, 0x0004, 0x0005],
    }
}

/// Public area of a P-256 signing key whose private scalar is `[7; 32]`
pub(crate) fn ecc_key_public() -> Public {
    with_point(ecc_template(EccCurve::NistP256), 7)
}

pub(crate) fn rsa_key_public() -> Public {
    let mut public = rsa_template(2048);
    if let PublicDetail::Rsa { modulus, .. } = &mut public.detail {
        let mut n = vec![0xc5u8; 256];
        n[255] = 0x01;
        *modulus = n;
    }
    public
}

pub(crate) fn key_with(key_type: KeyType, public: &Public, options: KeyOptions) -> TpmKey {
    TpmKey::from_device_blobs(
        key_type,
        public.marshal_2b().unwrap(),
        marshal_2b(&[0xaa; 16]).unwrap(),
        options,
    )
    .unwrap()
}

pub(crate) fn loadable_ecc_key() -> TpmKey {
    key_with(KeyType::Loadable, &ecc_key_public(), KeyOptions::new())
}

pub(crate) fn loadable_rsa_key() -> TpmKey {
    key_with(KeyType::Loadable, &rsa_key_public(), KeyOptions::new())
}
