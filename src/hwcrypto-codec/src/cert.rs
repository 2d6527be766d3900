//! Minimal self-signed X.509 certificates.
//!
//! Some keystores only accept a private key entry together with a
//! certificate chain. The certificate produced here is a carrier for the
//! public key and nothing more: it is never validated or trusted.

use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use der::asn1::{BitString, OctetString, UtcTime};
use der::oid::AssociatedOid;
use der::{Decode, Encode};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use tracing::debug;
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate, Version};

use crate::error::CodecError;

/// Subject and issuer distinguished name.
pub const CERTIFICATE_SUBJECT: &str = "CN=example";

/// Validity period in days.
pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

/// A DER-encoded self-signed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfSignedCertificate {
    der: Vec<u8>,
    serial: u64,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl SelfSignedCertificate {
    /// The encoded certificate.
    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Consume into the encoded certificate.
    #[must_use]
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    /// Serial number (issuance time in milliseconds since the epoch).
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Start of validity.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of validity.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

/// Issues self-signed certificates for P-256 keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct CertificateIssuer;

impl CertificateIssuer {
    /// Create an issuer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Self-sign the public half of `signing_key`, valid from now for one year.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Certificate`] if encoding or signing fails.
    pub fn self_sign(&self, signing_key: &SigningKey) -> Result<SelfSignedCertificate, CodecError> {
        self.self_sign_at(signing_key, Utc::now())
    }

    /// Self-sign with an explicit issuance time.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Certificate`] if encoding or signing fails, or
    /// if the validity period falls outside the UTCTime range.
    pub fn self_sign_at(
        &self,
        signing_key: &SigningKey,
        issued_at: DateTime<Utc>,
    ) -> Result<SelfSignedCertificate, CodecError> {
        let serial = u64::try_from(issued_at.timestamp_millis())
            .map_err(|_| CodecError::certificate("issuance time precedes the epoch"))?;
        let not_after = issued_at + Duration::days(CERTIFICATE_VALIDITY_DAYS);

        let subject = Name::from_str(CERTIFICATE_SUBJECT)?;
        let spki_der = signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| CodecError::certificate(format!("public key encoding: {e}")))?;
        let subject_public_key_info = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())?;

        let basic_constraints = BasicConstraints {
            ca: true,
            path_len_constraint: None,
        };
        let extension = Extension {
            extn_id: BasicConstraints::OID,
            critical: true,
            extn_value: OctetString::new(basic_constraints.to_der()?)?,
        };

        let signature_algorithm = AlgorithmIdentifierOwned {
            oid: ECDSA_WITH_SHA256,
            parameters: None,
        };

        let tbs_certificate = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&canonical_serial(serial))?,
            signature: signature_algorithm.clone(),
            issuer: subject.clone(),
            validity: Validity {
                not_before: utc_time(issued_at)?,
                not_after: utc_time(not_after)?,
            },
            subject,
            subject_public_key_info,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(vec![extension]),
        };

        let tbs_der = tbs_certificate.to_der()?;
        let signature: DerSignature = signing_key
            .try_sign(&tbs_der)
            .map_err(|e| CodecError::certificate(format!("signing failed: {e}")))?;

        let certificate = Certificate {
            tbs_certificate,
            signature_algorithm,
            signature: BitString::from_bytes(signature.as_bytes())?,
        };
        let der = certificate.to_der()?;

        debug!(serial, cert_len = der.len(), "self_sign: issued certificate");

        Ok(SelfSignedCertificate {
            der,
            serial,
            not_before: issued_at,
            not_after,
        })
    }
}

fn utc_time(at: DateTime<Utc>) -> Result<Time, CodecError> {
    Ok(Time::UtcTime(UtcTime::from_system_time(SystemTime::from(at))?))
}

/// Minimal positive INTEGER encoding of `value`.
fn canonical_serial(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}
