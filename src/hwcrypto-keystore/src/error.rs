//! Error types for keystore operations.

use hwcrypto_codec::CodecError;
use thiserror::Error;

/// Errors that can occur during keystore operations.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// No hardware keystore exists on this platform.
    #[error("No hardware keystore available on this platform")]
    NoPlatformSupport,

    /// The hardware keystore could not be reached.
    #[error("Hardware not available: {reason}")]
    HardwareNotAvailable {
        /// Reason hardware is not available.
        reason: String,
    },

    /// Key with the specified alias not found.
    #[error("Key not found: {alias}")]
    KeyNotFound {
        /// The key alias that was not found.
        alias: String,
    },

    /// Key already exists with this alias.
    #[error("Key already exists: {alias}")]
    KeyAlreadyExists {
        /// The key alias that already exists.
        alias: String,
    },

    /// The key was created but secure hardware does not enforce its
    /// authentication requirement.
    #[error("Authentication is not enforced by secure hardware for key: {alias}")]
    HardwareEnforcementUnavailable {
        /// The key alias that failed verification.
        alias: String,
    },

    /// Key generation failed.
    #[error("Key generation failed: {reason}")]
    KeyGenerationFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Key import failed inside the platform keystore.
    #[error("Key import failed: {reason}")]
    ImportFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// The backend cannot import external key material.
    #[error("Key import not supported: {reason}")]
    ImportNotSupported {
        /// Why the backend refuses imports.
        reason: String,
    },

    /// Key material is malformed or inconsistent.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Reason the key is invalid.
        reason: String,
    },

    /// Signing operation failed.
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// The user-presence check was rejected.
    #[error("User authentication failed: {reason}")]
    AuthenticationFailed {
        /// Reason reported by the authenticator.
        reason: String,
    },

    /// The user-presence check was cancelled.
    #[error("User authentication cancelled")]
    AuthenticationCancelled,

    /// Platform-specific error.
    #[error("Platform error: {message}")]
    PlatformError {
        /// Error message from the platform.
        message: String,
    },

    /// Persistent storage failed.
    #[error("Storage failed: {reason}")]
    StorageFailed {
        /// Reason for the failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl KeystoreError {
    /// Create a platform error from a message.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::PlatformError {
            message: message.into(),
        }
    }

    /// Create a signing error from a reason.
    #[must_use]
    pub fn signing(reason: impl Into<String>) -> Self {
        Self::SigningFailed {
            reason: reason.into(),
        }
    }

    /// Create a storage error from a reason.
    #[must_use]
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::StorageFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid key error from a reason.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create a key-not-found error for `alias`.
    #[must_use]
    pub fn not_found(alias: impl Into<String>) -> Self {
        Self::KeyNotFound {
            alias: alias.into(),
        }
    }
}

impl From<CodecError> for KeystoreError {
    fn from(err: CodecError) -> Self {
        if err.is_malformed_key() {
            Self::InvalidKey {
                reason: err.to_string(),
            }
        } else {
            Self::PlatformError {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for KeystoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for KeystoreError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageFailed {
            reason: err.to_string(),
        }
    }
}

#[cfg(target_os = "android")]
impl From<jni::errors::Error> for KeystoreError {
    fn from(err: jni::errors::Error) -> Self {
        Self::PlatformError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_map_to_invalid_key() {
        let err: KeystoreError = CodecError::UnknownAlgorithm.into();
        assert!(matches!(err, KeystoreError::InvalidKey { .. }));

        let err: KeystoreError = CodecError::certificate("bad time").into();
        assert!(matches!(err, KeystoreError::PlatformError { .. }));
    }

    #[test]
    fn test_display() {
        let err = KeystoreError::not_found("signing-key");
        assert_eq!(err.to_string(), "Key not found: signing-key");
    }
}
