//! Extraction of hardware-import key material from DER private keys.
//!
//! Accepted layouts:
//!
//! ```text
//! PKCS8      SEQ { INT 0, SEQ algId, OCTET { key } }
//! PKCS1      SEQ { INT 0, INT n, ... }            (whole buffer, legacy)
//! SEC1       SEQ { INT 1, OCTET d, [0] oid?, [1] BIT STRING point }
//! ```
//!
//! The PKCS8 algorithm identifier must match one of two fixed encodings
//! byte for byte: rsaEncryption with NULL parameters, or id-ecPublicKey
//! with the prime256v1 curve.

use std::fmt;

use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cursor::{
    DerCursor, TAG_BIT_STRING, TAG_CONTEXT_0, TAG_CONTEXT_1, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_SEQUENCE,
};
use crate::error::CodecError;

/// Length of an uncompressed P-256 point (`0x04 || X || Y`).
pub const EC_PUBLIC_POINT_LEN: usize = 65;
/// Length of a P-256 private scalar.
pub const EC_SCALAR_LEN: usize = 32;
/// Length of the EC raw import encoding (point followed by scalar).
pub const EC_RAW_KEY_LEN: usize = EC_PUBLIC_POINT_LEN + EC_SCALAR_LEN;

/// `AlgorithmIdentifier { rsaEncryption, NULL }`.
const RSA_ALGORITHM_ID: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

/// `AlgorithmIdentifier { id-ecPublicKey, prime256v1 }`.
const EC_P256_ALGORITHM_ID: [u8; 21] = [
    0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86,
    0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
];

/// `OBJECT IDENTIFIER prime256v1`, as it appears inside SEC1 `[0]` parameters.
const PRIME256V1_OID: [u8; 10] = [0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Key algorithm named by a PKCS8 algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// EC on curve P-256.
    EcP256,
    /// RSA (legacy path only).
    Rsa,
}

/// Key material in the form a hardware import API consumes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub enum RawImportKey {
    /// EC P-256 key split into its public point and private scalar.
    EcP256 {
        /// Uncompressed public point.
        public_point: [u8; EC_PUBLIC_POINT_LEN],
        /// Private scalar.
        private_scalar: [u8; EC_SCALAR_LEN],
    },
    /// PKCS1 `RSAPrivateKey` body, passed through untouched.
    Legacy(Vec<u8>),
}

impl RawImportKey {
    /// Algorithm of the contained key.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::EcP256 { .. } => KeyAlgorithm::EcP256,
            Self::Legacy(_) => KeyAlgorithm::Rsa,
        }
    }

    /// The hardware-import byte encoding.
    ///
    /// For EC keys this is the 65-byte point followed by the 32-byte scalar.
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::EcP256 {
                public_point,
                private_scalar,
            } => {
                let mut out = Vec::with_capacity(EC_RAW_KEY_LEN);
                out.extend_from_slice(public_point);
                out.extend_from_slice(private_scalar);
                Zeroizing::new(out)
            },
            Self::Legacy(body) => Zeroizing::new(body.clone()),
        }
    }

    /// The uncompressed public point of an EC key.
    #[must_use]
    pub fn public_point(&self) -> Option<&[u8; EC_PUBLIC_POINT_LEN]> {
        match self {
            Self::EcP256 { public_point, .. } => Some(public_point),
            Self::Legacy(_) => None,
        }
    }

    /// The private scalar of an EC key.
    #[must_use]
    pub fn private_scalar(&self) -> Option<&[u8; EC_SCALAR_LEN]> {
        match self {
            Self::EcP256 { private_scalar, .. } => Some(private_scalar),
            Self::Legacy(_) => None,
        }
    }
}

impl fmt::Debug for RawImportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcP256 { .. } => f.write_str("RawImportKey::EcP256(..)"),
            Self::Legacy(body) => write!(f, "RawImportKey::Legacy({} bytes)", body.len()),
        }
    }
}

/// Extract the hardware-import key from a DER private key.
///
/// # Errors
///
/// Any layout deviation, truncation or unsupported length encoding fails
/// with a [`CodecError`] for which [`CodecError::is_malformed_key`] holds.
pub fn extract_raw_key(der: &[u8]) -> Result<RawImportKey, CodecError> {
    let mut cursor = DerCursor::new(der);
    cursor.read_header(TAG_SEQUENCE)?;
    let version = read_version(&mut cursor)?;

    match cursor.peek_tag()? {
        TAG_INTEGER => {
            debug!(der_len = der.len(), "extract_raw_key: bare PKCS1 key");
            return Ok(RawImportKey::Legacy(der.to_vec()));
        },
        TAG_OCTET_STRING if version == 1 => {
            debug!(der_len = der.len(), "extract_raw_key: bare SEC1 key");
            return parse_ec_private_key(der);
        },
        _ => {},
    }

    let algorithm = read_algorithm(&mut cursor)?;
    let key = cursor.read_element(TAG_OCTET_STRING)?;

    match algorithm {
        KeyAlgorithm::EcP256 => {
            debug!("extract_raw_key: PKCS8 EC P-256 key");
            parse_ec_private_key(key)
        },
        KeyAlgorithm::Rsa => {
            if key.first() != Some(&TAG_SEQUENCE) {
                return Err(CodecError::invalid_structure(
                    "RSA key body is not a SEQUENCE",
                ));
            }
            debug!("extract_raw_key: PKCS8 RSA key");
            Ok(RawImportKey::Legacy(key.to_vec()))
        },
    }
}

fn read_version(cursor: &mut DerCursor<'_>) -> Result<u8, CodecError> {
    let &[version] = cursor.read_element(TAG_INTEGER)? else {
        return Err(CodecError::invalid_structure("version is not a single byte"));
    };
    Ok(version)
}

fn read_algorithm(cursor: &mut DerCursor<'_>) -> Result<KeyAlgorithm, CodecError> {
    let start = cursor.position();
    let params = cursor.read_element(TAG_SEQUENCE)?;
    // Header is two bytes for both accepted identifiers.
    let total = cursor.position() - start;
    if total != params.len() + 2 {
        return Err(CodecError::UnknownAlgorithm);
    }

    let mut encoded = Vec::with_capacity(total);
    encoded.push(TAG_SEQUENCE);
    // Short form: total <= 129 so the length fits in a byte.
    encoded.push(u8::try_from(params.len()).map_err(|_| CodecError::UnknownAlgorithm)?);
    encoded.extend_from_slice(params);

    if encoded == EC_P256_ALGORITHM_ID {
        Ok(KeyAlgorithm::EcP256)
    } else if encoded == RSA_ALGORITHM_ID {
        Ok(KeyAlgorithm::Rsa)
    } else {
        Err(CodecError::UnknownAlgorithm)
    }
}

fn parse_ec_private_key(bytes: &[u8]) -> Result<RawImportKey, CodecError> {
    let mut cursor = DerCursor::new(bytes);
    cursor.read_header(TAG_SEQUENCE)?;
    read_version(&mut cursor)?;

    let scalar = cursor.read_element(TAG_OCTET_STRING)?;
    if scalar.len() != EC_SCALAR_LEN {
        return Err(CodecError::invalid_structure(format!(
            "private scalar is {} bytes, expected {EC_SCALAR_LEN}",
            scalar.len()
        )));
    }

    if cursor.peek_tag()? == TAG_CONTEXT_0 {
        let params = cursor.read_element(TAG_CONTEXT_0)?;
        if params != PRIME256V1_OID {
            return Err(CodecError::UnknownAlgorithm);
        }
    }

    cursor.read_header(TAG_CONTEXT_1)?;
    let bits = cursor.read_element(TAG_BIT_STRING)?;
    let Some((&unused_bits, point)) = bits.split_first() else {
        return Err(CodecError::invalid_structure("empty public key bit string"));
    };
    if unused_bits != 0 {
        return Err(CodecError::invalid_structure(
            "public key bit string has unused bits",
        ));
    }
    if point.len() != EC_PUBLIC_POINT_LEN || point[0] != UNCOMPRESSED_POINT_TAG {
        return Err(CodecError::invalid_structure(
            "public key is not an uncompressed P-256 point",
        ));
    }

    let mut public_point = [0u8; EC_PUBLIC_POINT_LEN];
    public_point.copy_from_slice(point);
    let mut private_scalar = [0u8; EC_SCALAR_LEN];
    private_scalar.copy_from_slice(scalar);

    Ok(RawImportKey::EcP256 {
        public_point,
        private_scalar,
    })
}
