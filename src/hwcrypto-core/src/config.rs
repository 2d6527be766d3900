//! Configuration for the hardware crypto facade.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hwcrypto_keystore::{AssuranceClass, PromptRequest, MIN_ANDROID_API};
use serde::{Deserialize, Serialize};

use crate::error::HardwareCryptoError;

/// Text of the biometric prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Prompt title.
    pub title: String,
    /// Optional subtitle.
    pub subtitle: Option<String>,
    /// Label of the dismiss button.
    pub negative_button: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let request = PromptRequest::default();
        Self {
            title: request.title,
            subtitle: request.subtitle,
            negative_button: request.negative_button,
        }
    }
}

impl PromptConfig {
    /// Prompt request for the platform authenticator. Assurance is fixed.
    #[must_use]
    pub fn to_request(&self) -> PromptRequest {
        PromptRequest {
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            negative_button: self.negative_button.clone(),
            assurance: AssuranceClass::BiometricStrong,
        }
    }
}

/// Configuration for [`crate::HardwareCrypto`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareCryptoConfig {
    /// Seconds to wait for the user before a pending signature is
    /// cancelled. `None` waits indefinitely.
    pub auth_timeout_secs: Option<u64>,
    /// Prompt text.
    pub prompt: PromptConfig,
    /// Lowest Android API level treated as supported.
    pub minimum_android_api: u32,
    /// Treat a desktop host as a development emulator.
    pub development_host: bool,
    /// Where the emulated store keeps keys. In memory when unset.
    pub emulated_store_dir: Option<PathBuf>,
}

impl Default for HardwareCryptoConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: Some(120),
            prompt: PromptConfig::default(),
            minimum_android_api: MIN_ANDROID_API,
            development_host: false,
            emulated_store_dir: None,
        }
    }
}

impl HardwareCryptoConfig {
    /// Authentication timeout, if any.
    #[must_use]
    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout_secs.map(Duration::from_secs)
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, HardwareCryptoError> {
        let contents = std::fs::read_to_string(path).map_err(|e| HardwareCryptoError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&contents).map_err(|e| HardwareCryptoError::Config {
            message: format!("invalid config {}: {e}", path.display()),
        })
    }
}

/// Default directory of the emulated store on desktop hosts:
/// `$HOME/.local/share/hardware_crypto`.
pub fn default_store_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share/hardware_crypto"))
}
