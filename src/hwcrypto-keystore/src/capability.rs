//! Hardware capability detection.
//!
//! A single predicate gates every other operation: can this device hold a
//! biometric-gated signing key in secure hardware? Emulators and simulators
//! are deliberately let through so development builds work; they get the
//! emulated backend and a relaxed storage preference instead.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lowest Android API level with per-use biometric-strong key binding.
pub const MIN_ANDROID_API: u32 = 30;

/// Android system feature declaring a dedicated secure element.
pub const STRONGBOX_FEATURE: &str = "android.hardware.strongbox_keystore";

/// Operating system family of the running device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsFamily {
    /// Android with its API level.
    Android {
        /// `Build.VERSION.SDK_INT`.
        api_level: u32,
    },
    /// iOS or macOS.
    Apple {
        /// Built for the simulator.
        simulator: bool,
    },
    /// Any other host.
    Host {
        /// Explicitly configured as a development emulator.
        development: bool,
    },
}

/// Build identification strings, as reported by the Android build system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFingerprint {
    /// `Build.BRAND`
    pub brand: String,
    /// `Build.DEVICE`
    pub device: String,
    /// `Build.FINGERPRINT`
    pub fingerprint: String,
    /// `Build.HARDWARE`
    pub hardware: String,
    /// `Build.MODEL`
    pub model: String,
    /// `Build.MANUFACTURER`
    pub manufacturer: String,
    /// `Build.PRODUCT`
    pub product: String,
}

/// Partitions carrying `ro.product.*` identity, most specific first.
const PRODUCT_PARTITIONS: [&str; 4] = ["vendor.", "product.", "system.", ""];

const EMULATOR_MODELS: [&str; 3] = ["google_sdk", "Emulator", "Android SDK built for x86"];
const EMULATOR_PRODUCTS: [&str; 7] = [
    "sdk_google",
    "google_sdk",
    "sdk",
    "sdk_x86",
    "vbox86p",
    "emulator",
    "simulator",
];

impl BuildFingerprint {
    /// Whether any build string carries an emulator signature.
    #[must_use]
    pub fn is_emulator(&self) -> bool {
        (self.brand.starts_with("generic") && self.device.starts_with("generic"))
            || self.fingerprint.starts_with("generic")
            || self.fingerprint.starts_with("unknown")
            || self.hardware.contains("goldfish")
            || self.hardware.contains("ranchu")
            || EMULATOR_MODELS.iter().any(|m| self.model.contains(m))
            || self.manufacturer.contains("Genymotion")
            || EMULATOR_PRODUCTS.iter().any(|p| self.product.contains(p))
    }

    /// Read the fingerprint from system properties through `lookup`.
    ///
    /// Product identity is read from the vendor, product and system
    /// partitions before the legacy unpartitioned key. Returns the
    /// fingerprint and the SDK level, if present.
    pub fn from_properties(lookup: impl Fn(&str) -> Option<String>) -> (Self, Option<u32>) {
        let read = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
                .unwrap_or_default()
        };
        let product = |field: &str| {
            let keys = PRODUCT_PARTITIONS.map(|partition| format!("ro.product.{partition}{field}"));
            read(&keys.iter().map(String::as_str).collect::<Vec<_>>())
        };

        let build = Self {
            brand: product("brand"),
            device: product("device"),
            fingerprint: read(&[
                "ro.build.fingerprint",
                "ro.vendor.build.fingerprint",
                "ro.system.build.fingerprint",
            ]),
            hardware: read(&["ro.hardware", "ro.boot.hardware"]),
            model: product("model"),
            manufacturer: product("manufacturer"),
            product: product("name"),
        };
        let api_level = lookup("ro.build.version.sdk").and_then(|v| v.trim().parse().ok());

        (build, api_level)
    }
}

/// Everything capability detection looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// OS family and version.
    pub os: OsFamily,
    /// Build identification (Android only; empty elsewhere).
    pub build: BuildFingerprint,
    /// Whether the device declares a hardware secure element.
    pub secure_element: bool,
}

impl DeviceProfile {
    /// Profile of an Android device.
    #[must_use]
    pub fn android(api_level: u32, build: BuildFingerprint, secure_element: bool) -> Self {
        Self {
            os: OsFamily::Android { api_level },
            build,
            secure_element,
        }
    }

    /// Profile of an Apple device; the Secure Enclave is assumed present.
    #[must_use]
    pub fn apple(simulator: bool) -> Self {
        Self {
            os: OsFamily::Apple { simulator },
            build: BuildFingerprint::default(),
            secure_element: !simulator,
        }
    }

    /// Profile of a host without secure hardware.
    #[must_use]
    pub fn host(development: bool) -> Self {
        Self {
            os: OsFamily::Host { development },
            build: BuildFingerprint::default(),
            secure_element: false,
        }
    }

    /// Whether the device is an emulator, simulator or development host.
    #[must_use]
    pub fn is_emulator(&self) -> bool {
        match self.os {
            OsFamily::Android { .. } => self.build.is_emulator(),
            OsFamily::Apple { simulator } => simulator,
            OsFamily::Host { development } => development,
        }
    }

    /// Probe the running platform.
    pub fn detect() -> Self {
        #[cfg(target_os = "android")]
        {
            detect_android()
        }

        #[cfg(any(target_os = "ios", target_os = "macos"))]
        {
            Self::apple(cfg!(any(
                target_abi = "sim",
                all(target_os = "ios", target_arch = "x86_64")
            )))
        }

        #[cfg(not(any(target_os = "android", target_os = "ios", target_os = "macos")))]
        {
            Self::host(false)
        }
    }
}

#[cfg(target_os = "android")]
fn detect_android() -> DeviceProfile {
    crate::platform::android::detect_device()
}

/// Decides whether hardware-backed signing is available.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityDetector {
    min_android_api: u32,
}

impl CapabilityDetector {
    /// Create a detector with a custom Android API floor.
    #[must_use]
    pub fn new(min_android_api: u32) -> Self {
        Self { min_android_api }
    }

    /// The rule: too-old Android is unsupported, emulators are supported,
    /// everything else needs a declared secure element.
    #[must_use]
    pub fn is_supported(&self, profile: &DeviceProfile) -> bool {
        if let OsFamily::Android { api_level } = profile.os {
            if api_level < self.min_android_api {
                debug!(api_level, min = self.min_android_api, "is_supported: API level too low");
                return false;
            }
        }

        if profile.is_emulator() {
            debug!(os = ?profile.os, "is_supported: emulator detected");
            return true;
        }

        debug!(
            os = ?profile.os,
            secure_element = profile.secure_element,
            "is_supported: secure element check"
        );
        profile.secure_element
    }
}

impl Default for CapabilityDetector {
    fn default() -> Self {
        Self::new(MIN_ANDROID_API)
    }
}
