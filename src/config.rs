/*!
 * Engine configuration
 *
 * Tunables for a TPM connection: session parameters, the ECDH derivation
 * label and how misconfigured parent handles are treated.
 */

use serde::{Deserialize, Serialize};

use crate::error::{KeyFileError, KeyFileResult};

/// Default HKDF info label for `derive_ecdh`
pub const DEFAULT_ECDH_LABEL: &str = "github.com/foxboron/go-tpm-keyfile/v1/p256";

/// What to do when a key file names a transient handle as its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientParentPolicy {
    /// Create a storage root key under the owner hierarchy instead
    FallbackToOwner,

    /// Refuse the key file
    Reject,
}

/// Configuration for a [`TpmConnection`](crate::engine::TpmConnection)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Handling of transient parent handles found in key files
    pub transient_parent: TransientParentPolicy,

    /// Caller nonce size for HMAC sessions, in bytes
    pub session_nonce_size: u16,

    /// Property count passed to `TPM2_GetCapability`
    pub capability_property_count: u32,

    /// HKDF info label used by ECDH derivation
    pub ecdh_label: String,

    /// Length of the derived ECDH key, in bytes
    pub ecdh_key_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transient_parent: TransientParentPolicy::FallbackToOwner,
            session_nonce_size: 16,
            capability_property_count: 100,
            ecdh_label: DEFAULT_ECDH_LABEL.to_string(),
            ecdh_key_len: 32,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> KeyFileResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values against TPM and HKDF limits
    pub fn validate(&self) -> KeyFileResult<()> {
        if !(16..=32).contains(&self.session_nonce_size) {
            return Err(KeyFileError::config_error(
                "session_nonce_size",
                &format!("must be between 16 and 32, got {}", self.session_nonce_size),
            ));
        }
        // HKDF-SHA256 output is bounded by 255 blocks
        if self.ecdh_key_len == 0 || self.ecdh_key_len > 255 * 32 {
            return Err(KeyFileError::config_error(
                "ecdh_key_len",
                &format!("must be between 1 and 8160, got {}", self.ecdh_key_len),
            ));
        }
        if self.capability_property_count == 0 {
            return Err(KeyFileError::config_error(
                "capability_property_count",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
