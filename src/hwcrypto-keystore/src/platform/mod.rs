//! Platform keystore backends.
//!
//! Each platform has its own key facility:
//! - Android: Keystore (StrongBox or TEE) over JNI
//! - iOS/macOS: Secure Enclave
//! - Everything else, simulators and tests: the emulated store

#[cfg(target_os = "android")]
pub mod android;

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod apple;

mod emulated;
mod factory;

pub use emulated::{EmulatedAuthenticator, EmulatedKeystore, EnforcementMode, PromptBehavior};
pub use factory::{
    create_emulated_backend, create_platform_backend, detect_platform, PlatformBackend,
    PlatformCapabilities,
};

#[cfg(target_os = "android")]
pub use android::{init_jni, register_prompt_bridge, AndroidBiometricAuthenticator, AndroidKeystore};

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub use apple::{AppleKeystore, SystemPromptAuthenticator};
