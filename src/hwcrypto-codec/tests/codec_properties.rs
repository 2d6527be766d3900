//! Property-based tests for key material transcoding.
//!
//! The parsers see attacker-controlled bytes, so the properties here are
//! about robustness: arbitrary and mutated input must fail cleanly and
//! well-formed input must always yield the same raw key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hwcrypto_codec::{
    extract_raw_key, parse_pem, pem_to_raw_key, EC_PUBLIC_POINT_LEN, EC_RAW_KEY_LEN,
    PRIVATE_KEY_FOOTER, PRIVATE_KEY_HEADER,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::SecretKey;
use proptest::prelude::*;

/// Strategy for generating binary data of specified size range.
fn binary_data(min: usize, max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), min..=max)
}

/// Strategy for valid P-256 secret keys, derived from a non-zero seed.
fn secret_key() -> impl Strategy<Value = SecretKey> {
    prop::array::uniform32(any::<u8>())
        .prop_filter_map("scalar out of range", |bytes| {
            SecretKey::from_slice(&bytes).ok()
        })
}

fn wrap_pem(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let lines: Vec<&str> = body
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect();
    format!("{PRIVATE_KEY_HEADER}{}{PRIVATE_KEY_FOOTER}\n", lines.join("\n"))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Robustness
    // ========================================================================

    /// Arbitrary bytes never panic the DER parser.
    #[test]
    fn extract_arbitrary_bytes_never_panics(data in binary_data(0, 512)) {
        if let Err(err) = extract_raw_key(&data) {
            prop_assert!(err.is_malformed_key());
        }
    }

    /// Arbitrary text never panics the PEM parser.
    #[test]
    fn parse_arbitrary_text_never_panics(text in ".{0,256}") {
        let _ = parse_pem(&text);
    }

    /// Every strict prefix of a valid PKCS8 key is rejected.
    #[test]
    fn truncated_pkcs8_rejected(key in secret_key(), cut in any::<prop::sample::Index>()) {
        let der = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
        let len = cut.index(der.len());
        prop_assert!(extract_raw_key(&der[..len]).is_err());
    }

    /// Flipping a byte in the algorithm identifier is always rejected.
    #[test]
    fn corrupted_algorithm_rejected(
        key in secret_key(),
        idx in 6usize..27,
        flip in 1u8..=255,
    ) {
        let mut der = key.to_pkcs8_der().unwrap().as_bytes().to_vec();
        der[idx] ^= flip;
        prop_assert!(extract_raw_key(&der).is_err());
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    /// PKCS8 PEM yields point || scalar for any key.
    #[test]
    fn pkcs8_pem_yields_point_and_scalar(key in secret_key()) {
        let pem = wrap_pem(key.to_pkcs8_der().unwrap().as_bytes());
        let raw = pem_to_raw_key(&pem).unwrap();
        let bytes = raw.to_bytes();

        prop_assert_eq!(bytes.len(), EC_RAW_KEY_LEN);
        let point = key.public_key().to_encoded_point(false);
        prop_assert_eq!(&bytes[..EC_PUBLIC_POINT_LEN], point.as_bytes());
        let scalar = key.to_bytes();
        prop_assert_eq!(&bytes[EC_PUBLIC_POINT_LEN..], scalar.as_slice());
    }

    /// PKCS8 and bare SEC1 encodings of the same key agree.
    #[test]
    fn pkcs8_matches_bare_sec1(key in secret_key()) {
        let from_pkcs8 = extract_raw_key(key.to_pkcs8_der().unwrap().as_bytes()).unwrap();
        let from_sec1 = extract_raw_key(&key.to_sec1_der().unwrap()).unwrap();
        prop_assert_eq!(from_pkcs8.to_bytes().to_vec(), from_sec1.to_bytes().to_vec());
    }

    /// Headerless base64 with arbitrary line breaks parses like the armored form.
    #[test]
    fn headerless_with_breaks(key in secret_key(), width in 1usize..80) {
        let der = key.to_pkcs8_der().unwrap();
        let body = STANDARD.encode(der.as_bytes());
        let broken: Vec<String> = body
            .as_bytes()
            .chunks(width)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        let parsed = parse_pem(&broken.join("\r\n")).unwrap();
        prop_assert_eq!(parsed.as_bytes(), der.as_bytes());
    }
}
