//! Shared fixtures.

use std::sync::Arc;
use std::time::Duration;

use hwcrypto_core::{HardwareCrypto, HardwareCryptoConfig};
use hwcrypto_keystore::{
    EmulatedAuthenticator, EmulatedKeystore, EnforcementMode, PlatformBackend,
};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

/// Facade over an in-memory store whose keys report hardware enforcement.
pub fn hardware_crypto(
    auth: Arc<EmulatedAuthenticator>,
    timeout_secs: Option<u64>,
) -> HardwareCrypto {
    let keystore = EmulatedKeystore::in_memory().with_enforcement(EnforcementMode::SecureHardware);
    crypto_over(keystore, auth, timeout_secs, false)
}

pub fn crypto_over(
    keystore: EmulatedKeystore,
    auth: Arc<EmulatedAuthenticator>,
    timeout_secs: Option<u64>,
    is_emulator: bool,
) -> HardwareCrypto {
    let config = HardwareCryptoConfig {
        auth_timeout_secs: timeout_secs,
        ..HardwareCryptoConfig::default()
    };
    HardwareCrypto::with_backend(
        &config,
        PlatformBackend {
            keystore: Arc::new(keystore),
            authenticator: auth,
        },
        is_emulator,
    )
}

/// Wait until `auth` shows `count` open prompts.
pub async fn wait_for_prompts(auth: &EmulatedAuthenticator, count: usize) {
    for _ in 0..500 {
        if auth.pending() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("expected {count} open prompts, found {}", auth.pending());
}

/// Verify a DER signature against an uncompressed public point.
pub fn verifies(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    key.verify(payload, &signature).is_ok()
}
