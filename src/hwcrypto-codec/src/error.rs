//! Codec error types.

use thiserror::Error;

/// Errors produced while transcoding key material or issuing certificates.
#[derive(Debug, Error)]
pub enum CodecError {
    /// PEM text could not be reduced to base64 content.
    #[error("Malformed PEM: {reason}")]
    MalformedPem {
        /// Reason the PEM text was rejected.
        reason: String,
    },

    /// Base64 body failed to decode.
    #[error("Invalid base64 key body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// A read would run past the end of the DER buffer.
    #[error("DER truncated at offset {offset}: needed {needed} more byte(s)")]
    Truncated {
        /// Offset of the failed read.
        offset: usize,
        /// Number of bytes that were missing.
        needed: usize,
    },

    /// A tag other than the expected one was found.
    #[error("Unexpected DER tag at offset {offset}: expected 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag {
        /// Offset of the tag byte.
        offset: usize,
        /// Tag the parser required.
        expected: u8,
        /// Tag actually present.
        found: u8,
    },

    /// A length form outside the supported subset (short form and `0x81`).
    #[error("Unsupported DER length encoding 0x{first:02x} at offset {offset}")]
    UnsupportedLength {
        /// Offset of the length byte.
        offset: usize,
        /// First length byte.
        first: u8,
    },

    /// The algorithm identifier is neither rsaEncryption nor EC prime256v1.
    #[error("Unrecognized key algorithm identifier")]
    UnknownAlgorithm,

    /// The DER layout matched but a field had an impossible value.
    #[error("Invalid key structure: {reason}")]
    InvalidStructure {
        /// Reason the structure was rejected.
        reason: String,
    },

    /// Certificate construction or encoding failed.
    #[error("Certificate issuance failed: {reason}")]
    Certificate {
        /// Reason for the failure.
        reason: String,
    },
}

impl CodecError {
    /// Create a malformed PEM error.
    #[must_use]
    pub fn malformed_pem(reason: impl Into<String>) -> Self {
        Self::MalformedPem {
            reason: reason.into(),
        }
    }

    /// Create an invalid structure error.
    #[must_use]
    pub fn invalid_structure(reason: impl Into<String>) -> Self {
        Self::InvalidStructure {
            reason: reason.into(),
        }
    }

    /// Create a certificate error.
    #[must_use]
    pub fn certificate(reason: impl Into<String>) -> Self {
        Self::Certificate {
            reason: reason.into(),
        }
    }

    /// Whether this error describes unusable key material.
    ///
    /// Everything except certificate issuance falls in this class.
    #[must_use]
    pub fn is_malformed_key(&self) -> bool {
        !matches!(self, Self::Certificate { .. })
    }
}

impl From<der::Error> for CodecError {
    fn from(err: der::Error) -> Self {
        Self::Certificate {
            reason: err.to_string(),
        }
    }
}
