//! Core types for hardware key management.

use serde::{Deserialize, Serialize};

/// Type of secure hardware holding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HardwareType {
    /// Android StrongBox (dedicated secure element).
    StrongBox = 1,

    /// Android Keystore backed by the trusted execution environment.
    TrustedEnvironment = 2,

    /// Apple Secure Enclave.
    SecureEnclave = 3,

    /// Software emulation for simulators and development hosts.
    /// Provides no hardware binding.
    Emulated = 4,
}

impl HardwareType {
    /// Get the security level (1-5, higher is better).
    #[must_use]
    pub const fn security_level(&self) -> u8 {
        match self {
            Self::StrongBox => 5,
            Self::SecureEnclave => 5,
            Self::TrustedEnvironment => 3,
            Self::Emulated => 1,
        }
    }

    /// Whether keys of this type live in secure hardware.
    #[must_use]
    pub const fn is_hardware_backed(&self) -> bool {
        !matches!(self, Self::Emulated)
    }
}

/// Opaque reference to a private key held by the keystore.
///
/// A handle never carries private key bytes. It names the key by alias and
/// by the generation of the entry it was issued for, so a handle issued
/// before a delete cannot reach a key re-created under the same alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    alias: String,
    generation: u64,
    hardware_type: HardwareType,
}

impl KeyHandle {
    /// Create a handle. Only backends mint handles.
    #[must_use]
    pub fn new(alias: impl Into<String>, generation: u64, hardware_type: HardwareType) -> Self {
        Self {
            alias: alias.into(),
            generation,
            hardware_type,
        }
    }

    /// Key alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Entry generation the handle was issued for.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hardware holding the key.
    #[must_use]
    pub fn hardware_type(&self) -> HardwareType {
        self.hardware_type
    }
}

/// Authenticator strength a key accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssuranceClass {
    /// Class 3 biometrics only. Device credentials (PIN, pattern, password)
    /// and weak biometrics are rejected.
    BiometricStrong,
}

/// Operations a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPurposes {
    /// Produce signatures.
    pub sign: bool,
    /// Verify signatures.
    pub verify: bool,
}

/// Protection applied to every key this crate creates or imports.
///
/// EC P-256, sign and verify, SHA-256 digest, biometric-strong
/// authentication for every single use, and a key that survives biometric
/// enrollment changes. Only the storage preference varies: the dedicated
/// secure element is requested everywhere except emulators, which have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    prefer_secure_element: bool,
}

impl ProtectionPolicy {
    /// Curve size in bits.
    pub const KEY_SIZE_BITS: u32 = 256;
    /// Digest algorithm name, as platform keystores spell it.
    pub const DIGEST: &'static str = "SHA-256";
    /// Seconds an authentication stays valid. Zero means every use.
    pub const AUTH_VALIDITY_SECONDS: u32 = 0;

    /// Policy for a device; `is_emulator` drops the secure element preference.
    #[must_use]
    pub const fn for_device(is_emulator: bool) -> Self {
        Self {
            prefer_secure_element: !is_emulator,
        }
    }

    /// Whether the dedicated secure element is requested.
    #[must_use]
    pub const fn prefer_secure_element(&self) -> bool {
        self.prefer_secure_element
    }

    /// Permitted key purposes.
    #[must_use]
    pub const fn purposes(&self) -> KeyPurposes {
        KeyPurposes {
            sign: true,
            verify: true,
        }
    }

    /// Whether every use of the key requires authentication.
    #[must_use]
    pub const fn auth_required(&self) -> bool {
        true
    }

    /// Accepted authenticator strength.
    #[must_use]
    pub const fn assurance(&self) -> AssuranceClass {
        AssuranceClass::BiometricStrong
    }

    /// Whether enrolling a new biometric invalidates the key.
    #[must_use]
    pub const fn invalidated_by_enrollment(&self) -> bool {
        false
    }
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self::for_device(false)
    }
}

/// Protection attributes a backend reports for an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttributes {
    /// Hardware holding the key.
    pub hardware_type: HardwareType,
    /// Whether the private key lives inside secure hardware.
    pub inside_secure_hardware: bool,
    /// Whether secure hardware itself refuses use without authentication.
    pub auth_enforced_by_secure_hardware: bool,
}
