//! Error types for the hardware crypto facade.

use hwcrypto_codec::CodecError;
use hwcrypto_keystore::KeystoreError;
use thiserror::Error;

/// Errors returned by [`crate::HardwareCrypto`] operations.
#[derive(Debug, Error)]
pub enum HardwareCryptoError {
    /// The device cannot hold a biometric-gated key in secure hardware.
    #[error("Hardware-backed signing is not supported on this device")]
    UnsupportedPlatform,

    /// PEM or DER input could not be parsed, or the key is inconsistent.
    #[error("Malformed key material: {reason}")]
    MalformedKeyMaterial {
        /// What was wrong with the input.
        reason: String,
    },

    /// Secure hardware does not enforce the authentication requirement
    /// for this key. Nothing was left in the keystore.
    #[error("Hardware enforcement unavailable for key: {alias}")]
    HardwareEnforcementUnavailable {
        /// Alias of the rejected key.
        alias: String,
    },

    /// No key is stored under the alias.
    #[error("Key not found: {alias}")]
    KeyNotFound {
        /// The missing alias.
        alias: String,
    },

    /// The user-presence check failed.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        /// Reason reported by the authenticator.
        reason: String,
    },

    /// The signing request was cancelled before authentication completed.
    #[error("Authentication cancelled")]
    AuthenticationCancelled,

    /// The platform refused to produce a signature after authentication.
    #[error("Signature failure: {reason}")]
    SignatureFailure {
        /// Reason for the failure.
        reason: String,
    },

    /// Another request on the same alias is still running.
    #[error("Another request is in progress for key: {alias}")]
    AliasBusy {
        /// The busy alias.
        alias: String,
    },

    /// The request itself is invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// Why the request was rejected.
        reason: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Backend fault outside the categories above.
    #[error("Platform error: {message}")]
    Platform {
        /// Error message from the backend.
        message: String,
    },
}

impl HardwareCryptoError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            Self::MalformedKeyMaterial { .. } => "MALFORMED_KEY_MATERIAL",
            Self::HardwareEnforcementUnavailable { .. } => "HARDWARE_ENFORCEMENT_UNAVAILABLE",
            Self::KeyNotFound { .. } => "KEY_NOT_FOUND",
            Self::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Self::AuthenticationCancelled => "AUTHENTICATION_CANCELLED",
            Self::SignatureFailure { .. } => "SIGNATURE_FAILURE",
            Self::AliasBusy { .. } => "ALIAS_BUSY",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Config { .. } => "CONFIG",
            Self::Platform { .. } => "PLATFORM",
        }
    }

    /// Whether the failure came from the user-presence check.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::AuthenticationCancelled
        )
    }

    /// Create a platform error from a message.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

impl From<KeystoreError> for HardwareCryptoError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::NoPlatformSupport => Self::UnsupportedPlatform,
            KeystoreError::KeyNotFound { alias } => Self::KeyNotFound { alias },
            KeystoreError::HardwareEnforcementUnavailable { alias } => {
                Self::HardwareEnforcementUnavailable { alias }
            },
            KeystoreError::InvalidKey { reason } => Self::MalformedKeyMaterial { reason },
            KeystoreError::SigningFailed { reason } => Self::SignatureFailure { reason },
            KeystoreError::AuthenticationFailed { reason } => Self::AuthenticationFailed { reason },
            KeystoreError::AuthenticationCancelled => Self::AuthenticationCancelled,
            other => Self::Platform {
                message: other.to_string(),
            },
        }
    }
}

impl From<CodecError> for HardwareCryptoError {
    fn from(err: CodecError) -> Self {
        if err.is_malformed_key() {
            Self::MalformedKeyMaterial {
                reason: err.to_string(),
            }
        } else {
            Self::Platform {
                message: err.to_string(),
            }
        }
    }
}
