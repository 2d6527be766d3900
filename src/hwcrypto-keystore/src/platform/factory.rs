//! Platform detection and backend factory.
//!
//! Picks the one keystore backend and prompt for the running platform.
//! Hosts without secure hardware get the emulated store, which is only
//! reachable when the device profile marks them as development hosts.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::emulated::{EmulatedAuthenticator, EmulatedKeystore};
use crate::capability::{CapabilityDetector, DeviceProfile, OsFamily};
use crate::challenge::BiometricAuthenticator;
use crate::error::KeystoreError;
use crate::store::KeystoreBackend;
use crate::types::HardwareType;

/// Platform capabilities detected at runtime.
#[derive(Debug, Clone)]
pub struct PlatformCapabilities {
    /// Hardware new keys will be placed in.
    pub hardware_type: HardwareType,
    /// The probed device.
    pub profile: DeviceProfile,
    /// Whether hardware-backed signing is available.
    pub supported: bool,
    /// Whether the device is an emulator, simulator or development host.
    pub is_emulator: bool,
}

impl PlatformCapabilities {
    /// Evaluate a device profile.
    #[must_use]
    pub fn evaluate(detector: &CapabilityDetector, profile: DeviceProfile) -> Self {
        let hardware_type = match profile.os {
            OsFamily::Android { .. } if profile.secure_element => HardwareType::StrongBox,
            OsFamily::Android { .. } => HardwareType::TrustedEnvironment,
            OsFamily::Apple { simulator: false } => HardwareType::SecureEnclave,
            OsFamily::Apple { simulator: true } | OsFamily::Host { .. } => HardwareType::Emulated,
        };

        Self {
            hardware_type,
            supported: detector.is_supported(&profile),
            is_emulator: profile.is_emulator(),
            profile,
        }
    }
}

/// Detect capabilities of the current platform.
pub fn detect_platform(detector: &CapabilityDetector) -> PlatformCapabilities {
    let capabilities = PlatformCapabilities::evaluate(detector, DeviceProfile::detect());
    info!(
        hardware_type = ?capabilities.hardware_type,
        supported = capabilities.supported,
        is_emulator = capabilities.is_emulator,
        "detect_platform: done"
    );
    capabilities
}

/// The keystore backend and prompt selected for a platform.
#[derive(Clone)]
pub struct PlatformBackend {
    /// Key facility.
    pub keystore: Arc<dyn KeystoreBackend>,
    /// User-presence prompt.
    pub authenticator: Arc<dyn BiometricAuthenticator>,
}

/// Emulated store and an auto-approving prompt.
///
/// With `store_dir`, keys persist across runs under that directory.
pub fn create_emulated_backend(store_dir: Option<&Path>) -> Result<PlatformBackend, KeystoreError> {
    let keystore = match store_dir {
        Some(dir) => EmulatedKeystore::persistent(dir)?,
        None => EmulatedKeystore::in_memory(),
    };
    Ok(PlatformBackend {
        keystore: Arc::new(keystore),
        authenticator: Arc::new(EmulatedAuthenticator::approving()),
    })
}

/// Create the backend for `profile`.
///
/// `emulated_store_dir` is only used when the emulated store is selected.
pub fn create_platform_backend(
    profile: &DeviceProfile,
    emulated_store_dir: Option<&Path>,
) -> Result<PlatformBackend, KeystoreError> {
    info!(os = ?profile.os, "create_platform_backend: starting");

    match profile.os {
        OsFamily::Android { .. } => {
            #[cfg(target_os = "android")]
            {
                use super::android::{AndroidBiometricAuthenticator, AndroidKeystore};
                Ok(PlatformBackend {
                    keystore: Arc::new(AndroidKeystore::new(profile.secure_element)),
                    authenticator: Arc::new(AndroidBiometricAuthenticator::new()),
                })
            }

            #[cfg(not(target_os = "android"))]
            {
                Err(KeystoreError::NoPlatformSupport)
            }
        },
        OsFamily::Apple { simulator } => {
            #[cfg(any(target_os = "ios", target_os = "macos"))]
            {
                use super::apple::{AppleKeystore, SystemPromptAuthenticator};
                Ok(PlatformBackend {
                    keystore: Arc::new(AppleKeystore::new(simulator)),
                    authenticator: Arc::new(SystemPromptAuthenticator::new()),
                })
            }

            #[cfg(not(any(target_os = "ios", target_os = "macos")))]
            {
                let _ = simulator;
                Err(KeystoreError::NoPlatformSupport)
            }
        },
        OsFamily::Host { development } => {
            if !development {
                return Err(KeystoreError::NoPlatformSupport);
            }
            warn!("create_platform_backend: using emulated keystore (no hardware binding)");
            create_emulated_backend(emulated_store_dir)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform_does_not_panic() {
        let caps = detect_platform(&CapabilityDetector::default());
        assert_eq!(caps.is_emulator, caps.profile.is_emulator());
    }

    #[test]
    fn test_evaluate_hardware_types() {
        let detector = CapabilityDetector::default();
        let apple = PlatformCapabilities::evaluate(&detector, DeviceProfile::apple(false));
        assert_eq!(apple.hardware_type, HardwareType::SecureEnclave);
        assert!(apple.supported);

        let host = PlatformCapabilities::evaluate(&detector, DeviceProfile::host(false));
        assert_eq!(host.hardware_type, HardwareType::Emulated);
        assert!(!host.supported);
    }

    #[test]
    fn test_plain_host_has_no_backend() {
        assert!(matches!(
            create_platform_backend(&DeviceProfile::host(false), None),
            Err(KeystoreError::NoPlatformSupport)
        ));
    }

    #[test]
    fn test_development_host_gets_emulated_store() {
        let backend = create_platform_backend(&DeviceProfile::host(true), None).unwrap();
        assert_eq!(backend.keystore.hardware_type(), HardwareType::Emulated);
    }
}
