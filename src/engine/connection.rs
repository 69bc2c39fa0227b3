/*!
 * TPM connection
 *
 * [`TpmConnection`] owns a [`Transport`] and dispatches engine commands
 * through it. It attaches the session each command needs, turns TPM response
 * codes into [`KeyFileError`] values with the failing command named, and
 * scopes transient handles so they are flushed on every exit path.
 */

use crate::config::EngineConfig;
use crate::error::{KeyFileError, KeyFileResult};
use crate::tpm::session::{SaltKey, Session, SessionEncryption};
use crate::tpm::structures::{EccCurve, TpmHandle};
use crate::tpm::transport::{Command, Response, ResponseCode, Transport};

/// A connection to one TPM
pub struct TpmConnection<T: Transport> {
    transport: T,
    config: EngineConfig,
    salt: Option<SaltKey>,
    ecc_curves: Option<Vec<EccCurve>>,
}

impl<T: Transport> TpmConnection<T> {
    /// Open a connection with the default configuration
    pub fn new(transport: T) -> Self {
        TpmConnection {
            transport,
            config: EngineConfig::default(),
            salt: None,
            ecc_curves: None,
        }
    }

    /// Open a connection with a validated configuration
    pub fn with_config(transport: T, config: EngineConfig) -> KeyFileResult<Self> {
        config.validate()?;
        Ok(TpmConnection {
            transport,
            config,
            salt: None,
            ecc_curves: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the connection and hand back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub(crate) fn set_salt(&mut self, salt: Option<SaltKey>) {
        self.salt = salt;
    }

    /// Key the next sessions are salted with, if a parent is active
    pub fn salt(&self) -> Option<&SaltKey> {
        self.salt.as_ref()
    }

    fn session(&self, encryption: SessionEncryption) -> Session {
        Session::hmac(encryption, self.config.session_nonce_size, self.salt.clone())
    }

    /// Run `command`, authorized by an HMAC session with the given parameter
    /// encryption, or by password authorization when `encryption` is `None`
    pub(crate) fn execute(
        &mut self,
        command: Command,
        encryption: Option<SessionEncryption>,
        operation: &str,
    ) -> KeyFileResult<Response> {
        let session = encryption.map(|encryption| self.session(encryption));
        match command.target() {
            Some(handle) => log::debug!("{} on {} ({})", command.name(), handle, operation),
            None => log::debug!("{} ({})", command.name(), operation),
        }
        self.transport
            .execute(&command, session.as_ref())
            .map_err(|rc| response_error(&command, operation, rc))
    }

    /// Flush a transient handle, logging instead of failing
    pub(crate) fn flush(&mut self, handle: TpmHandle) {
        if let Err(err) = self.execute(Command::FlushContext { handle }, None, "flush") {
            log::warn!("Failed to flush transient handle {}: {}", handle, err);
        }
    }

    /// Run `f` with a transient handle and flush the handle afterwards,
    /// whether `f` succeeded or not
    pub(crate) fn with_temporary_handle<R, F>(&mut self, handle: TpmHandle, f: F) -> KeyFileResult<R>
    where
        F: FnOnce(&mut Self) -> KeyFileResult<R>,
    {
        let result = f(self);
        self.flush(handle);
        result
    }

    /// ECC curves implemented by the TPM, queried once per connection
    pub fn supported_curves(&mut self) -> KeyFileResult<Vec<EccCurve>> {
        if let Some(curves) = &self.ecc_curves {
            return Ok(curves.clone());
        }
        let command = Command::GetEccCurves {
            property_count: self.config.capability_property_count,
        };
        let curves = match self.execute(command, None, "supported_curves")? {
            Response::EccCurves { curves } => curves
                .into_iter()
                .filter_map(EccCurve::from_curve_id)
                .collect::<Vec<_>>(),
            _ => return Err(mismatch("TPM2_GetCapability")),
        };
        log::debug!("TPM supports ECC curves {:?}", curves);
        self.ecc_curves = Some(curves.clone());
        Ok(curves)
    }
}

fn response_error(command: &Command, operation: &str, rc: ResponseCode) -> KeyFileError {
    if rc.is_integrity_failure() {
        KeyFileError::IntegrityCheckFailure {
            operation: operation.to_string(),
            response_code: rc.value(),
        }
    } else {
        KeyFileError::device_failure(command.name(), operation, rc.value())
    }
}

/// Error for a transport answering with the wrong response variant
pub(crate) fn mismatch(command: &str) -> KeyFileError {
    KeyFileError::ResponseMismatch {
        command: command.to_string(),
    }
}
