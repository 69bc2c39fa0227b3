/*!
 * Error Handling for the TPM key-file engine
 *
 * Provides the error taxonomy shared by the key-file codec, the TPM structure
 * marshaling and the device-facing engine, with error codes, user-friendly
 * messages and suggested remediation strategies.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Comprehensive error type for all key-file and TPM operations
#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("Malformed encoding: {context} - {cause}")]
    Format { context: String, cause: String },

    #[error("Not a TSS2 key file: PEM label '{label}'")]
    NotAKeyFile { label: String },

    #[error("Unknown key type OID: {oid}")]
    UnknownKeyType { oid: String },

    #[error("Unsupported algorithm: {algorithm} for {operation}")]
    UnsupportedAlgorithm { algorithm: String, operation: String },

    #[error("Unsupported key size: {algorithm} with {bits} bits - {reason}")]
    UnsupportedKeySize {
        algorithm: String,
        bits: u16,
        reason: String,
    },

    #[error("Signature scheme {scheme} cannot be used with a {key_algorithm} key")]
    SchemeMismatch {
        scheme: String,
        key_algorithm: String,
    },

    #[error("Key of type {key_type} cannot be loaded")]
    NotLoadable { key_type: String },

    #[error("Key of type {key_type} cannot be used for signing")]
    NotSignable { key_type: String },

    #[error("Key of type {key_type} is not sealed data")]
    NotSealed { key_type: String },

    #[error("Key public area does not allow signing")]
    NoSignerCapability,

    #[error("Unsupported parent type: {parent_type}")]
    UnsupportedParentType { parent_type: String },

    #[error("Wrong key type: {operation} requires {expected}, got {actual}")]
    WrongKeyType {
        operation: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid digest length for {hash}: expected {expected} bytes, got {actual}")]
    InvalidDigestLength {
        hash: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid parameter: {parameter} - {expected} - got {actual}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        actual: String,
    },

    #[error("TPM command {command} failed during {operation}: response code {response_code:#x}")]
    DeviceCommandFailure {
        command: String,
        operation: String,
        response_code: u32,
    },

    #[error("TPM returned an unexpected response to {command}")]
    ResponseMismatch { command: String },

    #[error("TPM rejected the duplicate blob during {operation}: integrity check failed")]
    IntegrityCheckFailure { operation: String, response_code: u32 },

    #[error("Cryptographic operation failed: {operation} - {cause}")]
    CryptoFailure { operation: String, cause: String },

    #[error("TPM connection lock poisoned")]
    LockPoisoned,

    #[error("Invalid configuration: {setting} - {cause}")]
    ConfigError { setting: String, cause: String },
}

/// Error code constants for different error categories
pub mod error_codes {
    // Format errors: 1000-1999
    pub const MALFORMED_ENCODING: u32 = 1001;
    pub const NOT_A_KEY_FILE: u32 = 1002;
    pub const UNKNOWN_KEY_TYPE: u32 = 1003;

    // Algorithm errors: 2000-2999
    pub const UNSUPPORTED_ALGORITHM: u32 = 2001;
    pub const UNSUPPORTED_KEY_SIZE: u32 = 2002;
    pub const SCHEME_MISMATCH: u32 = 2003;
    pub const INVALID_DIGEST_LENGTH: u32 = 2004;

    // Key kind errors: 3000-3999
    pub const NOT_LOADABLE: u32 = 3001;
    pub const NOT_SIGNABLE: u32 = 3002;
    pub const NOT_SEALED: u32 = 3003;
    pub const NO_SIGNER_CAPABILITY: u32 = 3004;
    pub const UNSUPPORTED_PARENT_TYPE: u32 = 3005;
    pub const WRONG_KEY_TYPE: u32 = 3006;

    // Device errors: 4000-4999
    pub const DEVICE_COMMAND_FAILED: u32 = 4001;
    pub const RESPONSE_MISMATCH: u32 = 4002;
    pub const INTEGRITY_CHECK_FAILED: u32 = 4003;
    pub const LOCK_POISONED: u32 = 4004;

    // Local errors: 5000-5999
    pub const INVALID_PARAMETER: u32 = 5001;
    pub const CRYPTO_FAILURE: u32 = 5002;
    pub const CONFIG_INVALID: u32 = 5003;
}

impl KeyFileError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KeyFileError::Format { .. } => error_codes::MALFORMED_ENCODING,
            KeyFileError::NotAKeyFile { .. } => error_codes::NOT_A_KEY_FILE,
            KeyFileError::UnknownKeyType { .. } => error_codes::UNKNOWN_KEY_TYPE,
            KeyFileError::UnsupportedAlgorithm { .. } => error_codes::UNSUPPORTED_ALGORITHM,
            KeyFileError::UnsupportedKeySize { .. } => error_codes::UNSUPPORTED_KEY_SIZE,
            KeyFileError::SchemeMismatch { .. } => error_codes::SCHEME_MISMATCH,
            KeyFileError::NotLoadable { .. } => error_codes::NOT_LOADABLE,
            KeyFileError::NotSignable { .. } => error_codes::NOT_SIGNABLE,
            KeyFileError::NotSealed { .. } => error_codes::NOT_SEALED,
            KeyFileError::NoSignerCapability => error_codes::NO_SIGNER_CAPABILITY,
            KeyFileError::UnsupportedParentType { .. } => error_codes::UNSUPPORTED_PARENT_TYPE,
            KeyFileError::WrongKeyType { .. } => error_codes::WRONG_KEY_TYPE,
            KeyFileError::InvalidDigestLength { .. } => error_codes::INVALID_DIGEST_LENGTH,
            KeyFileError::InvalidParameter { .. } => error_codes::INVALID_PARAMETER,
            KeyFileError::DeviceCommandFailure { .. } => error_codes::DEVICE_COMMAND_FAILED,
            KeyFileError::ResponseMismatch { .. } => error_codes::RESPONSE_MISMATCH,
            KeyFileError::IntegrityCheckFailure { .. } => error_codes::INTEGRITY_CHECK_FAILED,
            KeyFileError::CryptoFailure { .. } => error_codes::CRYPTO_FAILURE,
            KeyFileError::LockPoisoned => error_codes::LOCK_POISONED,
            KeyFileError::ConfigError { .. } => error_codes::CONFIG_INVALID,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KeyFileError::Format { context, .. } => {
                format!("The {} could not be decoded. The data may be corrupted.", context)
            }
            KeyFileError::NotAKeyFile { label } => format!(
                "The PEM block '{}' is not a TSS2 PRIVATE KEY.",
                label
            ),
            KeyFileError::UnknownKeyType { oid } => format!(
                "The key file uses key type {} which this version does not understand.",
                oid
            ),
            KeyFileError::UnsupportedAlgorithm { algorithm, .. } => {
                format!("Algorithm '{}' is not supported here.", algorithm)
            }
            KeyFileError::UnsupportedKeySize { algorithm, bits, .. } => {
                format!("A {} key of {} bits cannot be created.", algorithm, bits)
            }
            KeyFileError::SchemeMismatch { scheme, key_algorithm } => format!(
                "The {} signature scheme does not apply to {} keys.",
                scheme, key_algorithm
            ),
            KeyFileError::NotLoadable { key_type }
            | KeyFileError::NotSignable { key_type }
            | KeyFileError::NotSealed { key_type } => format!(
                "This operation is not available for {} keys.",
                key_type
            ),
            KeyFileError::NoSignerCapability => {
                "The key was created without the sign attribute.".to_string()
            }
            KeyFileError::UnsupportedParentType { parent_type } => format!(
                "Keys cannot be imported under a {} parent.",
                parent_type
            ),
            KeyFileError::WrongKeyType { operation, expected, .. } => format!(
                "Operation '{}' needs a {} key.",
                operation, expected
            ),
            KeyFileError::InvalidDigestLength { hash, expected, .. } => format!(
                "A {} digest must be exactly {} bytes long.",
                hash, expected
            ),
            KeyFileError::InvalidParameter {
                parameter,
                expected,
                ..
            } => format!(
                "Invalid parameter '{}'. Expected '{}'.",
                parameter, expected
            ),
            KeyFileError::DeviceCommandFailure { command, .. } => format!(
                "The TPM refused the {} command. Check authorization values and the parent key.",
                command
            ),
            KeyFileError::ResponseMismatch { .. } => {
                "The TPM transport returned a response for a different command.".to_string()
            }
            KeyFileError::IntegrityCheckFailure { .. } => {
                "The wrapped key was modified or wrapped for a different parent.".to_string()
            }
            KeyFileError::CryptoFailure { operation, .. } => {
                format!("Local cryptographic operation '{}' failed.", operation)
            }
            KeyFileError::LockPoisoned => {
                "A previous operation on this TPM connection panicked.".to_string()
            }
            KeyFileError::ConfigError { setting, .. } => {
                format!("Configuration setting '{}' is invalid.", setting)
            }
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            KeyFileError::DeviceCommandFailure {
                command,
                operation,
                response_code,
            } => {
                details.insert("command".to_string(), command.clone());
                details.insert("operation".to_string(), operation.clone());
                details.insert("response_code".to_string(), format!("{:#x}", response_code));
            }
            KeyFileError::IntegrityCheckFailure {
                operation,
                response_code,
            } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("response_code".to_string(), format!("{:#x}", response_code));
            }
            KeyFileError::InvalidParameter {
                parameter,
                expected,
                actual,
            } => {
                details.insert("parameter".to_string(), parameter.clone());
                details.insert("expected".to_string(), expected.clone());
                details.insert("actual".to_string(), actual.clone());
            }
            KeyFileError::InvalidDigestLength {
                hash,
                expected,
                actual,
            } => {
                details.insert("hash".to_string(), hash.clone());
                details.insert("expected".to_string(), expected.to_string());
                details.insert("actual".to_string(), actual.to_string());
            }
            _ => {
                details.insert("details".to_string(), format!("{:?}", self));
            }
        }

        details
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            KeyFileError::UnsupportedKeySize { .. } => Some(
                "Use P-256, P-384 or P-521 as reported by the TPM, or RSA 2048.".to_string(),
            ),
            KeyFileError::DeviceCommandFailure { .. } => Some(
                "Verify the owner and key authorization values. Device-busy conditions are not retried."
                    .to_string(),
            ),
            KeyFileError::IntegrityCheckFailure { .. } => Some(
                "Re-wrap the external key against the public area of the intended parent."
                    .to_string(),
            ),
            KeyFileError::InvalidDigestLength { .. } => Some(
                "Hash the message with the algorithm passed to the signing call.".to_string(),
            ),
            KeyFileError::UnknownKeyType { .. } => Some(
                "Upgrade to a version that understands this key-file revision.".to_string(),
            ),
            KeyFileError::LockPoisoned => {
                Some("Open a new TPM connection.".to_string())
            }
            _ => None,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KeyFileError::Format { .. } => "FormatError",
            KeyFileError::NotAKeyFile { .. } => "NotAKeyFile",
            KeyFileError::UnknownKeyType { .. } => "UnknownKeyType",
            KeyFileError::UnsupportedAlgorithm { .. } => "UnsupportedAlgorithm",
            KeyFileError::UnsupportedKeySize { .. } => "UnsupportedKeySize",
            KeyFileError::SchemeMismatch { .. } => "SchemeMismatch",
            KeyFileError::NotLoadable { .. } => "NotLoadable",
            KeyFileError::NotSignable { .. } => "NotSignable",
            KeyFileError::NotSealed { .. } => "NotSealed",
            KeyFileError::NoSignerCapability => "NoSignerCapability",
            KeyFileError::UnsupportedParentType { .. } => "UnsupportedParentType",
            KeyFileError::WrongKeyType { .. } => "WrongKeyType",
            KeyFileError::InvalidDigestLength { .. } => "InvalidDigestLength",
            KeyFileError::InvalidParameter { .. } => "InvalidParameter",
            KeyFileError::DeviceCommandFailure { .. } => "DeviceCommandFailure",
            KeyFileError::ResponseMismatch { .. } => "ResponseMismatch",
            KeyFileError::IntegrityCheckFailure { .. } => "IntegrityCheckFailure",
            KeyFileError::CryptoFailure { .. } => "CryptoFailure",
            KeyFileError::LockPoisoned => "LockPoisoned",
            KeyFileError::ConfigError { .. } => "ConfigError",
        }
    }
}

/// Convenience constructors for common error types
impl KeyFileError {
    pub fn format(context: &str, cause: &str) -> Self {
        KeyFileError::Format {
            context: context.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn invalid_parameter(parameter: &str, expected: &str, actual: &str) -> Self {
        KeyFileError::InvalidParameter {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn unsupported_algorithm(algorithm: &str, operation: &str) -> Self {
        KeyFileError::UnsupportedAlgorithm {
            algorithm: algorithm.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn crypto_failure(operation: &str, cause: &str) -> Self {
        KeyFileError::CryptoFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn device_failure(command: &str, operation: &str, response_code: u32) -> Self {
        KeyFileError::DeviceCommandFailure {
            command: command.to_string(),
            operation: operation.to_string(),
            response_code,
        }
    }

    pub fn config_error(setting: &str, cause: &str) -> Self {
        KeyFileError::ConfigError {
            setting: setting.to_string(),
            cause: cause.to_string(),
        }
    }
}

// From implementations for automatic error conversion
impl From<der::Error> for KeyFileError {
    fn from(err: der::Error) -> Self {
        KeyFileError::format("DER structure", &err.to_string())
    }
}

impl From<pem::PemError> for KeyFileError {
    fn from(err: pem::PemError) -> Self {
        KeyFileError::format("PEM armor", &err.to_string())
    }
}

impl From<serde_json::Error> for KeyFileError {
    fn from(err: serde_json::Error) -> Self {
        KeyFileError::config_error("json", &err.to_string())
    }
}

/// Result type alias for key-file operations
pub type KeyFileResult<T> = Result<T, KeyFileError>;
