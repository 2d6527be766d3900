//! The keystore seam and the verifying store built on it.
//!
//! [`KeystoreBackend`] is the per-platform facility: Android Keystore,
//! Apple Secure Enclave, or the emulated store. [`SecureKeyStore`] wraps
//! exactly one backend, chosen at startup, and adds what every platform
//! shares: the fixed [`ProtectionPolicy`], import key checks, and
//! post-creation verification that secure hardware really enforces
//! authentication. A key that fails verification is deleted before the
//! creating call returns.

use std::sync::Arc;

use hwcrypto_codec::RawImportKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::error::KeystoreError;
use crate::session::SigningSession;
use crate::types::{HardwareType, KeyAttributes, KeyHandle, ProtectionPolicy};

/// A platform key facility.
///
/// Implementations are synchronous and bounded in latency; the only
/// suspending step of signing lives outside the backend.
pub trait KeystoreBackend: Send + Sync {
    /// Hardware that new keys are placed in.
    fn hardware_type(&self) -> HardwareType;

    /// Create an EC P-256 key under `alias`.
    ///
    /// Fails with [`KeystoreError::KeyAlreadyExists`] if the alias is taken.
    fn generate(&self, alias: &str, policy: &ProtectionPolicy)
        -> Result<KeyHandle, KeystoreError>;

    /// Store an externally supplied key under `alias`, replacing any
    /// existing entry.
    fn import(
        &self,
        alias: &str,
        key: &RawImportKey,
        policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError>;

    /// Find the key stored under `alias`.
    fn locate(&self, alias: &str) -> Result<Option<KeyHandle>, KeystoreError>;

    /// Report the protection actually applied to a key.
    fn attributes(&self, handle: &KeyHandle) -> Result<KeyAttributes, KeystoreError>;

    /// Export the public key in the backend's native encoding.
    fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, KeystoreError>;

    /// Remove the entry under `alias`. Returns whether one existed.
    fn delete(&self, alias: &str) -> Result<bool, KeystoreError>;

    /// Bind a SHA256-with-ECDSA context to a key without using it.
    fn begin_signature(&self, handle: &KeyHandle)
        -> Result<Box<dyn SigningSession>, KeystoreError>;
}

/// The process-wide key store.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct SecureKeyStore {
    backend: Arc<dyn KeystoreBackend>,
    policy: ProtectionPolicy,
    is_emulator: bool,
}

impl SecureKeyStore {
    /// Wrap a backend. `is_emulator` relaxes the storage preference and
    /// skips the hardware enforcement requirement.
    pub fn new(backend: Arc<dyn KeystoreBackend>, is_emulator: bool) -> Self {
        let policy = ProtectionPolicy::for_device(is_emulator);
        info!(
            hardware_type = ?backend.hardware_type(),
            is_emulator,
            prefer_secure_element = policy.prefer_secure_element(),
            "SecureKeyStore created"
        );
        Self {
            backend,
            policy,
            is_emulator,
        }
    }

    /// Policy applied to every key.
    pub fn policy(&self) -> ProtectionPolicy {
        self.policy
    }

    /// Hardware that new keys are placed in.
    pub fn hardware_type(&self) -> HardwareType {
        self.backend.hardware_type()
    }

    /// Whether the store runs on an emulator.
    pub fn is_emulator(&self) -> bool {
        self.is_emulator
    }

    /// Generate a key, or return the existing one for `alias`.
    pub fn generate(&self, alias: &str) -> Result<KeyHandle, KeystoreError> {
        info!(alias = %alias, "generate: creating key");

        match self.backend.generate(alias, &self.policy) {
            Ok(handle) => self.verify_enforcement(handle),
            Err(KeystoreError::KeyAlreadyExists { .. }) => {
                info!(alias = %alias, "generate: key already configured, keeping it");
                self.locate(alias)
            },
            Err(e) => {
                error!(alias = %alias, error = %e, "generate: backend failed");
                Err(e)
            },
        }
    }

    /// Import an EC P-256 key, replacing any key under `alias`.
    ///
    /// When `alias` is taken, the new key is first imported and verified
    /// under a staging alias, so a rejected import leaves the existing key
    /// in place.
    pub fn import(&self, alias: &str, key: &RawImportKey) -> Result<KeyHandle, KeystoreError> {
        info!(alias = %alias, algorithm = ?key.algorithm(), "import: storing key");

        check_key_consistency(key)?;
        if self.backend.locate(alias)?.is_some() {
            self.stage_import(alias, key)?;
        }
        let handle = self.backend.import(alias, key, &self.policy)?;
        self.verify_enforcement(handle)
    }

    /// Import and verify `key` next to the key already under `alias`.
    fn stage_import(&self, alias: &str, key: &RawImportKey) -> Result<(), KeystoreError> {
        let staging = staging_alias(alias);
        debug!(alias = %alias, "import: alias taken, verifying replacement first");

        let staged = self.backend.import(&staging, key, &self.policy)?;
        let verified = self.verify_enforcement(staged);
        self.discard(&staging);
        match verified {
            Ok(_) => Ok(()),
            Err(KeystoreError::HardwareEnforcementUnavailable { .. }) => {
                warn!(alias = %alias, "import: replacement rejected, existing key kept");
                Err(KeystoreError::HardwareEnforcementUnavailable {
                    alias: alias.to_string(),
                })
            },
            Err(e) => Err(e),
        }
    }

    /// Find the key for `alias`.
    pub fn locate(&self, alias: &str) -> Result<KeyHandle, KeystoreError> {
        self.backend
            .locate(alias)?
            .ok_or_else(|| KeystoreError::not_found(alias))
    }

    /// Export the public key of `alias` in the backend's native encoding.
    pub fn export_public_key(&self, alias: &str) -> Result<Vec<u8>, KeystoreError> {
        let handle = self.locate(alias)?;
        let public_key = self.backend.public_key(&handle)?;
        debug!(alias = %alias, len = public_key.len(), "export_public_key: exported");
        Ok(public_key)
    }

    /// Delete the key for `alias`. Deleting a missing key succeeds.
    pub fn delete(&self, alias: &str) -> Result<bool, KeystoreError> {
        let removed = self.backend.delete(alias)?;
        info!(alias = %alias, removed, "delete: done");
        Ok(removed)
    }

    /// Protection attributes of a key.
    pub fn attributes(&self, handle: &KeyHandle) -> Result<KeyAttributes, KeystoreError> {
        self.backend.attributes(handle)
    }

    /// Bind a signing context to a key.
    pub fn begin_signature(
        &self,
        handle: &KeyHandle,
    ) -> Result<Box<dyn SigningSession>, KeystoreError> {
        self.backend.begin_signature(handle)
    }

    /// Confirm secure hardware enforces authentication, or delete the key.
    fn verify_enforcement(&self, handle: KeyHandle) -> Result<KeyHandle, KeystoreError> {
        let alias = handle.alias().to_string();

        let attributes = match self.backend.attributes(&handle) {
            Ok(attributes) => attributes,
            Err(e) => {
                error!(alias = %alias, error = %e, "verify_enforcement: attribute query failed");
                self.discard(&alias);
                return Err(e);
            },
        };

        debug!(
            alias = %alias,
            inside_secure_hardware = attributes.inside_secure_hardware,
            auth_enforced = attributes.auth_enforced_by_secure_hardware,
            "verify_enforcement: attributes"
        );

        if !attributes.auth_enforced_by_secure_hardware && !self.is_emulator {
            warn!(
                alias = %alias,
                "verify_enforcement: authentication not enforced by secure hardware, deleting key"
            );
            self.discard(&alias);
            return Err(KeystoreError::HardwareEnforcementUnavailable { alias });
        }

        info!(
            alias = %alias,
            hardware_type = ?attributes.hardware_type,
            "verify_enforcement: key accepted"
        );
        Ok(handle)
    }

    fn discard(&self, alias: &str) {
        if let Err(e) = self.backend.delete(alias) {
            error!(alias = %alias, error = %e, "discard: cleanup delete failed");
        }
    }
}

/// Alias a replacement key is verified under before it takes `alias`.
fn staging_alias(alias: &str) -> String {
    format!("{alias}\u{1f}staged-import")
}

/// Reject non-EC keys and keys whose scalar does not produce their point.
fn check_key_consistency(key: &RawImportKey) -> Result<(), KeystoreError> {
    let (Some(point), Some(scalar)) = (key.public_point(), key.private_scalar()) else {
        return Err(KeystoreError::invalid_key(
            "only EC P-256 keys can be imported",
        ));
    };

    let secret = SecretKey::from_slice(scalar)
        .map_err(|_| KeystoreError::invalid_key("private scalar out of range"))?;
    let derived = secret.public_key().to_encoded_point(false);

    if !bool::from(derived.as_bytes().ct_eq(point.as_slice())) {
        return Err(KeystoreError::invalid_key(
            "public point does not match private scalar",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{EmulatedKeystore, EnforcementMode};
    use p256::elliptic_curve::rand_core::OsRng;

    fn raw_key(secret: &SecretKey) -> RawImportKey {
        let mut public_point = [0u8; 65];
        public_point.copy_from_slice(secret.public_key().to_encoded_point(false).as_bytes());
        let mut private_scalar = [0u8; 32];
        private_scalar.copy_from_slice(&secret.to_bytes());
        RawImportKey::EcP256 {
            public_point,
            private_scalar,
        }
    }

    fn store(mode: EnforcementMode, is_emulator: bool) -> (SecureKeyStore, Arc<EmulatedKeystore>) {
        let backend = Arc::new(EmulatedKeystore::in_memory().with_enforcement(mode));
        let backend_dyn: Arc<dyn KeystoreBackend> = backend.clone();
        (SecureKeyStore::new(backend_dyn, is_emulator), backend)
    }

    #[test]
    fn test_generate_then_locate() {
        let (store, _) = store(EnforcementMode::SecureHardware, false);
        let handle = store.generate("k1").unwrap();
        assert_eq!(store.locate("k1").unwrap(), handle);
    }

    #[test]
    fn test_generate_existing_keeps_key() {
        let (store, _) = store(EnforcementMode::SecureHardware, false);
        let first = store.generate("k1").unwrap();
        let before = store.export_public_key("k1").unwrap();

        let second = store.generate("k1").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.export_public_key("k1").unwrap(), before);
    }

    #[test]
    fn test_unenforced_key_deleted_off_emulator() {
        let (store, backend) = store(EnforcementMode::Software, false);
        assert!(matches!(
            store.generate("k1"),
            Err(KeystoreError::HardwareEnforcementUnavailable { .. })
        ));
        assert!(backend.locate("k1").unwrap().is_none());
        assert!(matches!(
            store.locate("k1"),
            Err(KeystoreError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_unenforced_key_kept_on_emulator() {
        let (store, _) = store(EnforcementMode::Software, true);
        assert!(store.generate("k1").is_ok());
        assert!(!store.policy().prefer_secure_element());
    }

    #[test]
    fn test_unenforced_import_deleted_off_emulator() {
        let (store, backend) = store(EnforcementMode::Software, false);
        let secret = SecretKey::random(&mut OsRng);
        assert!(matches!(
            store.import("k2", &raw_key(&secret)),
            Err(KeystoreError::HardwareEnforcementUnavailable { .. })
        ));
        assert!(backend.locate("k2").unwrap().is_none());
    }

    #[test]
    fn test_rejected_import_keeps_existing_key() {
        let (store, backend) = store(EnforcementMode::GeneratedOnly, false);
        let original = store.generate("k2").unwrap();
        let before = store.export_public_key("k2").unwrap();

        let secret = SecretKey::random(&mut OsRng);
        assert!(matches!(
            store.import("k2", &raw_key(&secret)),
            Err(KeystoreError::HardwareEnforcementUnavailable { alias }) if alias == "k2"
        ));

        assert_eq!(store.locate("k2").unwrap(), original);
        assert_eq!(store.export_public_key("k2").unwrap(), before);
        assert_eq!(backend.aliases().unwrap(), vec!["k2".to_string()]);
    }

    #[test]
    fn test_import_replaces_existing_key() {
        let (store, backend) = store(EnforcementMode::SecureHardware, false);
        let original = store.generate("k2").unwrap();

        let secret = SecretKey::random(&mut OsRng);
        let key = raw_key(&secret);
        let replaced = store.import("k2", &key).unwrap();

        assert_ne!(replaced, original);
        assert_eq!(
            store.export_public_key("k2").unwrap(),
            key.public_point().unwrap().to_vec()
        );
        assert_eq!(backend.aliases().unwrap(), vec!["k2".to_string()]);
    }

    #[test]
    fn test_import_mismatched_point_rejected() {
        let (store, backend) = store(EnforcementMode::SecureHardware, false);
        let a = SecretKey::random(&mut OsRng);
        let b = SecretKey::random(&mut OsRng);

        let mut key = raw_key(&a);
        if let RawImportKey::EcP256 { public_point, .. } = &mut key {
            public_point.copy_from_slice(b.public_key().to_encoded_point(false).as_bytes());
        }

        assert!(matches!(
            store.import("k3", &key),
            Err(KeystoreError::InvalidKey { .. })
        ));
        assert!(backend.locate("k3").unwrap().is_none());
    }

    #[test]
    fn test_import_legacy_rejected() {
        let (store, _) = store(EnforcementMode::SecureHardware, false);
        let key = RawImportKey::Legacy(vec![0x30, 0x00]);
        assert!(matches!(
            store.import("k4", &key),
            Err(KeystoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_delete_idempotent() {
        let (store, _) = store(EnforcementMode::SecureHardware, false);
        assert!(!store.delete("never-created").unwrap());
        store.generate("k5").unwrap();
        assert!(store.delete("k5").unwrap());
        assert!(!store.delete("k5").unwrap());
    }

    #[test]
    fn test_export_missing_key() {
        let (store, _) = store(EnforcementMode::SecureHardware, false);
        assert!(matches!(
            store.export_public_key("missing"),
            Err(KeystoreError::KeyNotFound { .. })
        ));
    }
}
