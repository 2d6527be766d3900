//! Property-based tests for signing and import.

use std::sync::Arc;

use hwcrypto_core::HardwareCryptoError;
use hwcrypto_keystore::EmulatedAuthenticator;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use p256::SecretKey;
use proptest::prelude::*;

use crate::support::{hardware_crypto, verifies};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Strategy for valid P-256 secret keys.
fn secret_key() -> impl Strategy<Value = SecretKey> {
    prop::array::uniform32(any::<u8>())
        .prop_filter_map("scalar out of range", |bytes| {
            SecretKey::from_slice(&bytes).ok()
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Signing
    // ========================================================================

    /// Every payload signs to a signature the exported key verifies.
    #[test]
    fn signature_verifies_for_any_payload(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let crypto = hardware_crypto(Arc::new(EmulatedAuthenticator::approving()), None);
        crypto.generate_key_pair("k").unwrap();
        let public_key = crypto.export_public_key("k").unwrap();

        let signature = runtime().block_on(crypto.sign("k", &payload)).unwrap();
        prop_assert!(verifies(&public_key, &payload, &signature));
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// An imported key exports exactly its own public point.
    #[test]
    fn imported_key_exports_its_point(secret in secret_key()) {
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let crypto = hardware_crypto(Arc::new(EmulatedAuthenticator::approving()), None);
        crypto.import_pem_key("k", &pem).unwrap();

        let point = secret.public_key().to_encoded_point(false);
        prop_assert_eq!(crypto.export_public_key("k").unwrap(), point.as_bytes().to_vec());
    }

    /// Arbitrary text fails only as malformed key material.
    #[test]
    fn arbitrary_text_fails_as_malformed(text in "\\PC{0,256}") {
        let crypto = hardware_crypto(Arc::new(EmulatedAuthenticator::approving()), None);
        if let Err(err) = crypto.import_pem_key("k", &text) {
            let is_malformed = matches!(err, HardwareCryptoError::MalformedKeyMaterial { .. });
            prop_assert!(is_malformed);
        }
    }
}
