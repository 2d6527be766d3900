//! The hardware crypto facade.
//!
//! Every operation is gated on capability detection: on an unsupported
//! device each one fails with `UnsupportedPlatform` before touching any
//! keystore. Mutating operations and `sign` claim their alias for their
//! whole duration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hwcrypto_codec::pem_to_raw_key;
use hwcrypto_keystore::{
    create_platform_backend, CapabilityDetector, DeviceProfile, HardwareType, KeystoreError,
    OsFamily, PlatformBackend, PlatformCapabilities, SecureKeyStore,
};
use tracing::{debug, info, warn};

use crate::config::HardwareCryptoConfig;
use crate::error::HardwareCryptoError;
use crate::registry::AliasRegistry;
use crate::signer::{cancel_pair, AuthenticatedSigner, CancelHandle, CancelSignal};

/// A signing request started with [`HardwareCrypto::sign_cancellable`].
pub type SignFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, HardwareCryptoError>> + Send>>;

struct Engine {
    store: SecureKeyStore,
    signer: AuthenticatedSigner,
}

struct Inner {
    capabilities: PlatformCapabilities,
    engine: Option<Engine>,
    registry: AliasRegistry,
}

/// Hardware-backed P-256 key management with biometric-gated signing.
///
/// Constructed once per process; cheap to clone.
#[derive(Clone)]
pub struct HardwareCrypto {
    inner: Arc<Inner>,
}

impl HardwareCrypto {
    /// Probe the running device and open its keystore.
    pub fn new(config: &HardwareCryptoConfig) -> Result<Self, HardwareCryptoError> {
        let mut profile = DeviceProfile::detect();
        if config.development_host {
            if let OsFamily::Host { .. } = profile.os {
                profile = DeviceProfile::host(true);
            }
        }
        Self::with_profile(config, profile)
    }

    /// Open the keystore for an explicit device profile.
    pub fn with_profile(
        config: &HardwareCryptoConfig,
        profile: DeviceProfile,
    ) -> Result<Self, HardwareCryptoError> {
        let detector = CapabilityDetector::new(config.minimum_android_api);
        let capabilities = PlatformCapabilities::evaluate(&detector, profile);

        let engine = if capabilities.supported {
            let backend = create_platform_backend(
                &capabilities.profile,
                config.emulated_store_dir.as_deref(),
            )?;
            Some(Self::engine(config, backend, capabilities.is_emulator))
        } else {
            warn!(os = ?capabilities.profile.os, "HardwareCrypto: platform not supported");
            None
        };

        info!(
            hardware_type = ?capabilities.hardware_type,
            supported = capabilities.supported,
            is_emulator = capabilities.is_emulator,
            "HardwareCrypto initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                capabilities,
                engine,
                registry: AliasRegistry::new(),
            }),
        })
    }

    /// Use an already constructed backend. The device counts as supported.
    pub fn with_backend(
        config: &HardwareCryptoConfig,
        backend: PlatformBackend,
        is_emulator: bool,
    ) -> Self {
        let hardware_type = backend.keystore.hardware_type();
        let capabilities = PlatformCapabilities {
            hardware_type,
            profile: DeviceProfile::host(is_emulator),
            supported: true,
            is_emulator,
        };
        info!(
            hardware_type = ?hardware_type,
            is_emulator,
            "HardwareCrypto initialized with backend"
        );

        Self {
            inner: Arc::new(Inner {
                capabilities,
                engine: Some(Self::engine(config, backend, is_emulator)),
                registry: AliasRegistry::new(),
            }),
        }
    }

    fn engine(
        config: &HardwareCryptoConfig,
        backend: PlatformBackend,
        is_emulator: bool,
    ) -> Engine {
        let store = SecureKeyStore::new(backend.keystore, is_emulator);
        let signer = AuthenticatedSigner::new(
            store.clone(),
            backend.authenticator,
            config.prompt.to_request(),
            config.auth_timeout(),
        );
        Engine { store, signer }
    }

    fn engine_for(&self, alias: &str) -> Result<&Engine, HardwareCryptoError> {
        self.inner.engine.as_ref().ok_or_else(|| {
            debug!(alias = %alias, "rejected: platform not supported");
            HardwareCryptoError::UnsupportedPlatform
        })
    }

    /// Engine for a create or import. An empty alias is an invalid request.
    fn engine_for_create(&self, alias: &str) -> Result<&Engine, HardwareCryptoError> {
        let engine = self.engine_for(alias)?;
        if alias.is_empty() {
            return Err(HardwareCryptoError::InvalidRequest {
                reason: "alias must not be empty".into(),
            });
        }
        Ok(engine)
    }

    /// Engine for a lookup. Nothing is ever stored under an empty alias.
    fn engine_for_lookup(&self, alias: &str) -> Result<&Engine, HardwareCryptoError> {
        let engine = self.engine_for(alias)?;
        if alias.is_empty() {
            return Err(HardwareCryptoError::KeyNotFound {
                alias: String::new(),
            });
        }
        Ok(engine)
    }

    /// Whether this device can hold biometric-gated keys in secure hardware.
    pub fn is_supported(&self) -> bool {
        self.inner.capabilities.supported
    }

    /// Detected capabilities.
    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.inner.capabilities
    }

    /// Hardware new keys are placed in.
    pub fn hardware_type(&self) -> HardwareType {
        self.inner.capabilities.hardware_type
    }

    /// Create a biometric-gated P-256 key under `alias`.
    ///
    /// An existing key under `alias` is kept.
    pub fn generate_key_pair(&self, alias: &str) -> Result<(), HardwareCryptoError> {
        let engine = self.engine_for_create(alias)?;
        let _guard = self.inner.registry.acquire(alias)?;
        engine.store.generate(alias)?;
        Ok(())
    }

    /// Import an EC P-256 private key from PEM (PKCS8, or headerless base64
    /// DER) under `alias`, replacing any existing key.
    pub fn import_pem_key(&self, alias: &str, pem: &str) -> Result<(), HardwareCryptoError> {
        let engine = self.engine_for_create(alias)?;
        let _guard = self.inner.registry.acquire(alias)?;

        let raw_key = pem_to_raw_key(pem)?;
        engine.store.import(alias, &raw_key).map_err(|e| match e {
            KeystoreError::ImportNotSupported { reason } => {
                warn!(alias = %alias, reason = %reason, "import_pem_key: backend refuses imports");
                HardwareCryptoError::HardwareEnforcementUnavailable {
                    alias: alias.to_string(),
                }
            },
            other => other.into(),
        })?;
        Ok(())
    }

    /// Export the public key of `alias` in the backend's native encoding:
    /// SubjectPublicKeyInfo DER on Android, the 65-byte uncompressed point
    /// elsewhere.
    pub fn export_public_key(&self, alias: &str) -> Result<Vec<u8>, HardwareCryptoError> {
        let engine = self.engine_for_lookup(alias)?;
        Ok(engine.store.export_public_key(alias)?)
    }

    /// Delete the key under `alias`. Returns whether a key was removed;
    /// deleting a missing key succeeds.
    pub fn delete_key_pair(&self, alias: &str) -> Result<bool, HardwareCryptoError> {
        let engine = self.engine_for(alias)?;
        if alias.is_empty() {
            return Ok(false);
        }
        let _guard = self.inner.registry.acquire(alias)?;
        Ok(engine.store.delete(alias)?)
    }

    /// Sign `payload` after a biometric challenge.
    ///
    /// Returns a DER-encoded ECDSA signature over SHA-256(`payload`).
    /// Dropping the future cancels the challenge.
    pub async fn sign(&self, alias: &str, payload: &[u8]) -> Result<Vec<u8>, HardwareCryptoError> {
        let engine = self.engine_for_lookup(alias)?;
        let _guard = self.inner.registry.acquire(alias)?;
        engine
            .signer
            .sign(alias, payload.to_vec(), CancelSignal::never())
            .await
    }

    /// Start a signing request that can be cancelled through the returned
    /// handle, independently of whoever awaits the future.
    ///
    /// The alias is claimed immediately; a busy alias makes the future
    /// resolve to `AliasBusy`.
    pub fn sign_cancellable(&self, alias: &str, payload: &[u8]) -> (CancelHandle, SignFuture) {
        let (handle, signal) = cancel_pair();
        let alias = alias.to_string();
        let payload = payload.to_vec();

        let claim = self
            .engine_for_lookup(&alias)
            .map(|engine| engine.signer.clone())
            .and_then(|signer| Ok((signer, self.inner.registry.acquire(&alias)?)));

        let future = async move {
            let (signer, _guard) = claim?;
            signer.sign(&alias, payload, signal).await
        };
        (handle, Box::pin(future))
    }
}

impl std::fmt::Debug for HardwareCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareCrypto")
            .field("hardware_type", &self.inner.capabilities.hardware_type)
            .field("supported", &self.inner.capabilities.supported)
            .field("is_emulator", &self.inner.capabilities.is_emulator)
            .finish()
    }
}
