//! Secure Enclave backend for iOS and macOS.
//!
//! Keys are EC P-256 keys created inside the Secure Enclave with an access
//! control of `privateKeyUsage | biometryAny`, so every signature needs a
//! fresh biometric match and an enrollment change does not destroy the key.
//! Simulator builds have no enclave; keys there are software keychain keys.
//!
//! The enclave only creates keys. External key material cannot be imported.
//!
//! Each signing session owns an `LAContext`. The authenticator evaluates
//! the biometric policy on it, and cancelling the challenge invalidates it,
//! which dismisses the system prompt. `finish` then looks the key up again
//! through that context with interaction disallowed, so the signature uses
//! the authentication already obtained and never shows a second prompt.

use std::ffi::c_void;
use std::sync::Mutex;

use block2::RcBlock;
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::{CFString, CFStringRef};
use objc2::rc::Retained;
use objc2::runtime::Bool;
use objc2_foundation::{NSError, NSString};
use objc2_local_authentication::{LAContext, LAPolicy};
use security_framework::access_control::{ProtectionMode, SecAccessControl};
use security_framework::item::{
    ItemClass, ItemSearchOptions, Limit, Location, Reference, SearchResult,
};
use security_framework::key::{Algorithm, GenerateKeyOptions, KeyType, SecKey, Token};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use hwcrypto_codec::RawImportKey;

use crate::challenge::{
    challenge_channel, Authorization, BiometricAuthenticator, ChallengeResolver, PendingChallenge,
    PromptRequest,
};
use crate::error::KeystoreError;
use crate::session::{check_authorization, next_session_id, SigningSession};
use crate::store::KeystoreBackend;
use crate::types::{HardwareType, KeyAttributes, KeyHandle, ProtectionPolicy};

/// `kSecAccessControlBiometryAny`
const ACCESS_BIOMETRY_ANY: usize = 1 << 1;
/// `kSecAccessControlPrivateKeyUsage`
const ACCESS_PRIVATE_KEY_USAGE: usize = 1 << 30;

/// `errSecUserCanceled`
const ERR_USER_CANCELED: isize = -128;
/// `errSecAuthFailed`
const ERR_AUTH_FAILED: isize = -25293;
/// `errSecItemNotFound`
const ERR_ITEM_NOT_FOUND: i32 = -25300;
/// `errSecInteractionNotAllowed`
const ERR_INTERACTION_NOT_ALLOWED: isize = -25308;

#[link(name = "Security", kind = "framework")]
extern "C" {
    static kSecClass: CFStringRef;
    static kSecClassKey: CFStringRef;
    static kSecAttrLabel: CFStringRef;
    static kSecReturnRef: CFStringRef;
    static kSecMatchLimit: CFStringRef;
    static kSecMatchLimitOne: CFStringRef;
    static kSecUseAuthenticationContext: CFStringRef;

    fn SecItemCopyMatching(query: CFTypeRef, result: *mut CFTypeRef) -> i32;
}

/// An `LAContext` shared between the prompt and the signing thread.
#[derive(Clone)]
struct SharedContext(Retained<LAContext>);

// SAFETY: LocalAuthentication documents LAContext as usable from any
// thread; evaluation replies arrive on a private queue.
unsafe impl Send for SharedContext {}
// SAFETY: as above.
unsafe impl Sync for SharedContext {}

impl SharedContext {
    fn new() -> Self {
        // SAFETY: plain allocation and init of an NSObject subclass.
        Self(unsafe { LAContext::new() })
    }

    fn invalidate(&self) {
        // SAFETY: invalidate has no preconditions and is idempotent.
        unsafe { self.0.invalidate() };
    }
}

/// Secure Enclave keystore.
pub struct AppleKeystore {
    secure_enclave: bool,
}

impl AppleKeystore {
    /// Create the backend. `simulator` selects software keychain keys.
    #[must_use]
    pub fn new(simulator: bool) -> Self {
        info!(simulator, "AppleKeystore created");
        Self {
            secure_enclave: !simulator,
        }
    }

    fn find(alias: &str) -> Result<Option<SecKey>, KeystoreError> {
        let results = match ItemSearchOptions::new()
            .class(ItemClass::key())
            .label(alias)
            .load_refs(true)
            .limit(Limit::Max(1))
            .search()
        {
            Ok(results) => results,
            Err(e) if e.code() == ERR_ITEM_NOT_FOUND => return Ok(None),
            Err(e) => {
                return Err(KeystoreError::platform(format!(
                    "keychain search failed: {e}"
                )))
            },
        };

        Ok(results.into_iter().find_map(|result| match result {
            SearchResult::Ref(Reference::Key(key)) => Some(key),
            _ => None,
        }))
    }

    fn handle_for(&self, alias: &str, key: &SecKey) -> Result<KeyHandle, KeystoreError> {
        Ok(KeyHandle::new(
            alias,
            key_generation(key)?,
            self.hardware_type(),
        ))
    }
}

fn public_point(key: &SecKey) -> Result<Vec<u8>, KeystoreError> {
    let public_key = key
        .public_key()
        .ok_or_else(|| KeystoreError::platform("SecKeyCopyPublicKey returned nothing"))?;
    let data = public_key
        .external_representation()
        .ok_or_else(|| KeystoreError::platform("SecKeyCopyExternalRepresentation failed"))?;
    Ok(data.bytes().to_vec())
}

/// Generation of a keychain key: the leading bytes of its public key hash.
fn key_generation(key: &SecKey) -> Result<u64, KeystoreError> {
    let digest = Sha256::digest(public_point(key)?);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(prefix))
}

/// Fetch the key for `alias` bound to an authenticated `context`.
fn key_with_context(alias: &str, context: &SharedContext) -> Result<SecKey, KeystoreError> {
    // SAFETY: the statics are immutable CFStrings exported by Security.framework.
    let (class, class_key, label, return_ref, limit, limit_one, auth_context) = unsafe {
        (
            CFString::wrap_under_get_rule(kSecClass),
            CFString::wrap_under_get_rule(kSecClassKey),
            CFString::wrap_under_get_rule(kSecAttrLabel),
            CFString::wrap_under_get_rule(kSecReturnRef),
            CFString::wrap_under_get_rule(kSecMatchLimit),
            CFString::wrap_under_get_rule(kSecMatchLimitOne),
            CFString::wrap_under_get_rule(kSecUseAuthenticationContext),
        )
    };
    // SAFETY: LAContext is an Objective-C object, which CFRetain accepts.
    let context_value =
        unsafe { CFType::wrap_under_get_rule(Retained::as_ptr(&context.0).cast::<c_void>()) };

    let query = CFDictionary::from_CFType_pairs(&[
        (class.as_CFType(), class_key.as_CFType()),
        (label.as_CFType(), CFString::new(alias).as_CFType()),
        (return_ref.as_CFType(), CFBoolean::true_value().as_CFType()),
        (limit.as_CFType(), limit_one.as_CFType()),
        (auth_context.as_CFType(), context_value),
    ]);

    let mut result: CFTypeRef = std::ptr::null();
    // SAFETY: `query` is a valid dictionary and `result` receives a +1 reference.
    let status = unsafe { SecItemCopyMatching(query.as_CFTypeRef(), &mut result) };
    match status {
        0 if !result.is_null() => {
            // SAFETY: kSecReturnRef on a key class yields a SecKeyRef we own.
            Ok(unsafe { SecKey::wrap_under_create_rule(result as _) })
        },
        ERR_ITEM_NOT_FOUND => Err(KeystoreError::not_found(alias)),
        _ => Err(KeystoreError::platform(format!(
            "keychain lookup with authentication context failed: {status}"
        ))),
    }
}

fn current_key(handle: &KeyHandle) -> Result<SecKey, KeystoreError> {
    match AppleKeystore::find(handle.alias())? {
        Some(key) if key_generation(&key)? == handle.generation() => Ok(key),
        _ => Err(KeystoreError::not_found(handle.alias())),
    }
}

impl KeystoreBackend for AppleKeystore {
    fn hardware_type(&self) -> HardwareType {
        if self.secure_enclave {
            HardwareType::SecureEnclave
        } else {
            HardwareType::Emulated
        }
    }

    fn generate(
        &self,
        alias: &str,
        policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        if Self::find(alias)?.is_some() {
            return Err(KeystoreError::KeyAlreadyExists {
                alias: alias.to_string(),
            });
        }

        let use_enclave = self.secure_enclave && policy.prefer_secure_element();
        let flags = if use_enclave {
            ACCESS_PRIVATE_KEY_USAGE | ACCESS_BIOMETRY_ANY
        } else {
            ACCESS_BIOMETRY_ANY
        };
        let access_control = SecAccessControl::create_with_protection(
            Some(ProtectionMode::AccessibleWhenUnlockedThisDeviceOnly),
            flags as _,
        )
        .map_err(|e| KeystoreError::KeyGenerationFailed {
            reason: format!("access control creation failed: {e}"),
        })?;

        let mut options = GenerateKeyOptions::default();
        options
            .set_key_type(KeyType::ec())
            .set_size_in_bits(ProtectionPolicy::KEY_SIZE_BITS)
            .set_label(alias)
            .set_location(Location::DataProtectionKeychain)
            .set_access_control(access_control)
            .set_token(if use_enclave {
                Token::SecureEnclave
            } else {
                Token::Software
            });

        let key = SecKey::new(&options).map_err(|e| {
            error!(alias = %alias, error = ?e, "SecKeyCreateRandomKey failed");
            KeystoreError::KeyGenerationFailed {
                reason: format!("SecKeyCreateRandomKey failed: {e:?}"),
            }
        })?;

        info!(alias = %alias, secure_enclave = use_enclave, "Key generated");
        self.handle_for(alias, &key)
    }

    fn import(
        &self,
        alias: &str,
        _key: &RawImportKey,
        _policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        debug!(alias = %alias, "import: refused by Secure Enclave");
        Err(KeystoreError::ImportNotSupported {
            reason: "the Secure Enclave only holds keys it generated".into(),
        })
    }

    fn locate(&self, alias: &str) -> Result<Option<KeyHandle>, KeystoreError> {
        Self::find(alias)?
            .map(|key| self.handle_for(alias, &key))
            .transpose()
    }

    fn attributes(&self, handle: &KeyHandle) -> Result<KeyAttributes, KeystoreError> {
        current_key(handle)?;
        Ok(KeyAttributes {
            hardware_type: self.hardware_type(),
            inside_secure_hardware: self.secure_enclave,
            auth_enforced_by_secure_hardware: self.secure_enclave,
        })
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, KeystoreError> {
        public_point(&current_key(handle)?)
    }

    fn delete(&self, alias: &str) -> Result<bool, KeystoreError> {
        if Self::find(alias)?.is_none() {
            return Ok(false);
        }

        ItemSearchOptions::new()
            .class(ItemClass::key())
            .label(alias)
            .delete()
            .map_err(|e| KeystoreError::platform(format!("keychain delete failed: {e}")))?;
        info!(alias = %alias, "Key deleted from keychain");
        Ok(true)
    }

    fn begin_signature(
        &self,
        handle: &KeyHandle,
    ) -> Result<Box<dyn SigningSession>, KeystoreError> {
        current_key(handle)?;
        let session = AppleSession {
            id: next_session_id(),
            handle: handle.clone(),
            context: SharedContext::new(),
        };
        debug!(alias = %handle.alias(), session_id = session.id, "Signing session bound");
        Ok(Box::new(session))
    }
}

struct AppleSession {
    id: u64,
    handle: KeyHandle,
    context: SharedContext,
}

impl SigningSession for AppleSession {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    fn finish(
        self: Box<Self>,
        authorization: &Authorization,
        payload: &[u8],
    ) -> Result<Vec<u8>, KeystoreError> {
        check_authorization(self.id, authorization)?;
        current_key(&self.handle)?;

        // SAFETY: setter with no preconditions.
        unsafe { self.context.0.setInteractionNotAllowed(true) };
        let key = key_with_context(self.handle.alias(), &self.context)?;
        if key_generation(&key)? != self.handle.generation() {
            return Err(KeystoreError::not_found(self.handle.alias()));
        }

        let signed = key.create_signature(Algorithm::ECDSASignatureMessageX962SHA256, payload);
        self.context.invalidate();
        let signature = signed.map_err(|e| match e.code() {
            ERR_USER_CANCELED => KeystoreError::AuthenticationCancelled,
            ERR_AUTH_FAILED | ERR_INTERACTION_NOT_ALLOWED => KeystoreError::AuthenticationFailed {
                reason: format!("{e:?}"),
            },
            _ => KeystoreError::signing(format!("SecKeyCreateSignature failed: {e:?}")),
        })?;

        info!(alias = %self.handle.alias(), sig_len = signature.len(), "Signature created");
        Ok(signature)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Authenticator that evaluates the biometric policy on the session's
/// `LAContext`.
///
/// Cancelling the pending challenge invalidates the context, which
/// dismisses the system prompt.
#[derive(Debug, Default)]
pub struct SystemPromptAuthenticator;

impl SystemPromptAuthenticator {
    /// Create the authenticator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BiometricAuthenticator for SystemPromptAuthenticator {
    fn authenticate(
        &self,
        request: &PromptRequest,
        session: &dyn SigningSession,
    ) -> Result<PendingChallenge, KeystoreError> {
        let session_id = session.session_id();
        let context = session
            .as_any()
            .downcast_ref::<AppleSession>()
            .map(|s| s.context.clone())
            .ok_or_else(|| KeystoreError::platform("session was not opened by AppleKeystore"))?;

        let (resolver, pending) = challenge_channel(session_id);
        let resolver = Mutex::new(Some(resolver));
        let reply = RcBlock::new(move |success: Bool, error: *mut NSError| {
            let Some(resolver) = resolver.lock().ok().and_then(|mut r| r.take()) else {
                return;
            };
            resolve(session_id, resolver, success.as_bool(), error);
        });

        let reason = NSString::from_str(request.subtitle.as_deref().unwrap_or(&request.title));
        let cancel_title = NSString::from_str(&request.negative_button);
        // SAFETY: the context is alive for the duration of the calls and the
        // reply block is retained by LocalAuthentication until it runs.
        unsafe {
            context.0.setLocalizedCancelTitle(Some(&cancel_title));
            context.0.evaluatePolicy_localizedReason_reply(
                LAPolicy::DeviceOwnerAuthenticationWithBiometrics,
                &reason,
                &reply,
            );
        }
        debug!(
            alias = %session.handle().alias(),
            session_id,
            title = %request.title,
            "biometric prompt shown"
        );

        Ok(pending.on_cancel(move || {
            context.invalidate();
            debug!(session_id, "biometric prompt dismissed");
        }))
    }
}

fn resolve(session_id: u64, resolver: ChallengeResolver, success: bool, error: *mut NSError) {
    if success {
        resolver.succeed();
        return;
    }
    // SAFETY: LocalAuthentication passes either null or a valid NSError.
    let details = unsafe {
        error
            .as_ref()
            .map(|error| (error.code(), error.localizedDescription().to_string()))
    };
    match details {
        Some((code, message)) => {
            let code = i32::try_from(code).unwrap_or(i32::MIN);
            warn!(session_id, code, reason = %message, "biometric evaluation failed");
            resolver.error(code, message);
        },
        None => {
            resolver.fail();
        },
    }
}
