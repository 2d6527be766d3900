//! # hwcrypto-keystore
//!
//! Hardware keystore adapter for biometric-gated ECDSA P-256 signing.
//!
//! Every key is created (or imported) under one fixed [`ProtectionPolicy`]:
//! P-256, SHA-256, biometric-strong authentication for every use. After a
//! key is stored its actual attributes are read back; if secure hardware
//! does not enforce the authentication requirement the key is deleted and
//! the call fails. There is no silent downgrade.
//!
//! ## Platform Support
//!
//! | Platform | Backend | Public key export | Prompt |
//! |----------|---------|-------------------|--------|
//! | Android | Keystore (StrongBox / TEE) | SubjectPublicKeyInfo DER | BiometricPrompt via host bridge |
//! | iOS / macOS | Secure Enclave | 65-byte X9.63 point | `LAContext` evaluation |
//! | Emulators, dev hosts | Emulated (software) | 65-byte point | [`EmulatedAuthenticator`] |
//!
//! ## Signing flow
//!
//! ```text
//! SecureKeyStore::begin_signature ──> SigningSession
//!        BiometricAuthenticator::authenticate(session) ──> PendingChallenge
//!        PendingChallenge.await ──> AuthOutcome::Succeeded(Authorization)
//!        SigningSession::finish(authorization, payload) ──> DER signature
//! ```
//!
//! The session is consumed by `finish` and an [`Authorization`] only unlocks
//! the session it was minted for.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod capability;
mod challenge;
mod error;
mod session;
mod store;
mod types;

/// Platform keystore backends.
pub mod platform;

pub use capability::{
    BuildFingerprint, CapabilityDetector, DeviceProfile, OsFamily, MIN_ANDROID_API,
    STRONGBOX_FEATURE,
};
pub use challenge::{
    challenge_channel, AuthOutcome, Authorization, BiometricAuthenticator, ChallengeResolver,
    PendingChallenge, PromptRequest,
};
pub use error::KeystoreError;
pub use session::{check_authorization, next_session_id, SigningSession};
pub use store::{KeystoreBackend, SecureKeyStore};
pub use types::{
    AssuranceClass, HardwareType, KeyAttributes, KeyHandle, KeyPurposes, ProtectionPolicy,
};

pub use platform::{
    create_emulated_backend, create_platform_backend, detect_platform, EmulatedAuthenticator,
    EmulatedKeystore, EnforcementMode, PlatformBackend, PlatformCapabilities, PromptBehavior,
};
