//! Android Keystore backend and BiometricPrompt bridge.
//!
//! Keys live in `AndroidKeyStore`, in StrongBox when the policy asks for it
//! and the device has one, otherwise in the TEE. All access goes through
//! JNI on whatever thread the caller is on.
//!
//! The prompt itself must be shown from the UI layer, so the host app
//! registers a `io.hwcrypto.PromptBridge` object exposing
//! `authenticate(long, String, String, String, java.security.Signature)` and
//! `cancel(long)`. The bridge reports back through the exported
//! `nativeOnSucceeded` / `nativeOnError` / `nativeOnFailed` functions below.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, CString};
use std::sync::{Mutex, OnceLock, RwLock};

use hwcrypto_codec::{CertificateIssuer, RawImportKey};
use jni::objects::{GlobalRef, JByteArray, JClass, JObject, JString, JValue, JValueOwned};
use jni::sys::{jint, jlong};
use jni::{JNIEnv, JavaVM};
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePrivateKey;
use tracing::{debug, error, info, warn};

use crate::capability::{BuildFingerprint, DeviceProfile, STRONGBOX_FEATURE};
use crate::challenge::{
    challenge_channel, Authorization, BiometricAuthenticator, ChallengeResolver, PendingChallenge,
    PromptRequest,
};
use crate::error::KeystoreError;
use crate::session::{check_authorization, next_session_id, SigningSession};
use crate::store::KeystoreBackend;
use crate::types::{HardwareType, KeyAttributes, KeyHandle, ProtectionPolicy};

const KEYSTORE_PROVIDER: &str = "AndroidKeyStore";
const SIGNATURE_ALGORITHM: &str = "SHA256withECDSA";

/// `KeyProperties.PURPOSE_SIGN | KeyProperties.PURPOSE_VERIFY`
const PURPOSE_SIGN_VERIFY: i32 = 4 | 8;
/// `KeyProperties.AUTH_BIOMETRIC_STRONG`
const AUTH_BIOMETRIC_STRONG: i32 = 2;

const KEYGEN_BUILDER: &str = "android/security/keystore/KeyGenParameterSpec$Builder";
const KEYGEN_BUILDER_RET: &str = "Landroid/security/keystore/KeyGenParameterSpec$Builder;";
const PROTECTION_BUILDER: &str = "android/security/keystore/KeyProtection$Builder";
const PROTECTION_BUILDER_RET: &str = "Landroid/security/keystore/KeyProtection$Builder;";
const BRIDGE_AUTHENTICATE_SIG: &str = concat!(
    "(JLjava/lang/String;Ljava/lang/String;Ljava/lang/String;",
    "Ljava/security/Signature;)V"
);
const SET_ENTRY_SIG: &str = concat!(
    "(Ljava/lang/String;Ljava/security/KeyStore$Entry;",
    "Ljava/security/KeyStore$ProtectionParameter;)V"
);

const BUILD: &str = "android/os/Build";
const BUILD_VERSION: &str = "android/os/Build$VERSION";

/// `PROP_VALUE_MAX` from `sys/system_properties.h`.
const PROP_VALUE_MAX: usize = 92;

extern "C" {
    fn __system_property_get(name: *const c_char, value: *mut c_char) -> c_int;
}

/// Global JavaVM reference, set during JNI_OnLoad or explicit initialization.
static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();

/// Initialize the JNI subsystem with a JavaVM reference.
///
/// Must be called before any keystore operation. `JNI_OnLoad` does this
/// automatically when the library is loaded through `System.loadLibrary`.
pub fn init_jni(vm: JavaVM) -> Result<(), KeystoreError> {
    info!("init_jni: initializing JavaVM reference");
    JAVA_VM.set(vm).map_err(|_| {
        error!("init_jni: JavaVM already initialized");
        KeystoreError::HardwareNotAvailable {
            reason: "JavaVM already initialized".into(),
        }
    })
}

fn get_java_vm() -> Result<&'static JavaVM, KeystoreError> {
    JAVA_VM.get().ok_or_else(|| {
        warn!("JNI not initialized - call init_jni() or load the library via System.loadLibrary()");
        KeystoreError::HardwareNotAvailable {
            reason: "JNI not initialized".into(),
        }
    })
}

/// JNI_OnLoad - called automatically when the library is loaded by Android.
///
/// # Safety
///
/// Called by the JVM with a valid `JavaVM` pointer.
#[no_mangle]
pub unsafe extern "system" fn JNI_OnLoad(
    vm: *mut jni::sys::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jint {
    info!("JNI_OnLoad: hwcrypto native library loaded");

    let vm = match JavaVM::from_raw(vm) {
        Ok(vm) => vm,
        Err(e) => {
            error!("JNI_OnLoad: failed to create JavaVM wrapper: {}", e);
            return jni::sys::JNI_ERR;
        },
    };

    if let Err(e) = init_jni(vm) {
        error!("JNI_OnLoad: failed to initialize JNI: {}", e);
        return jni::sys::JNI_ERR;
    }

    jni::sys::JNI_VERSION_1_6
}

/// Clear any pending Java exception and turn a JNI failure into an error.
fn jni_failure(env: &mut JNIEnv<'_>, context: &str, err: jni::errors::Error) -> KeystoreError {
    if matches!(err, jni::errors::Error::JavaException) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
    }
    error!(context, error = %err, "JNI call failed");
    KeystoreError::HardwareNotAvailable {
        reason: format!("{context} failed: {err}"),
    }
}

fn call<'local>(
    env: &mut JNIEnv<'local>,
    obj: &JObject<'_>,
    name: &str,
    sig: &str,
    args: &[JValue<'_, '_>],
) -> Result<JValueOwned<'local>, KeystoreError> {
    match env.call_method(obj, name, sig, args) {
        Ok(value) => Ok(value),
        Err(e) => Err(jni_failure(env, name, e)),
    }
}

fn call_static<'local>(
    env: &mut JNIEnv<'local>,
    class: &str,
    name: &str,
    sig: &str,
    args: &[JValue<'_, '_>],
) -> Result<JValueOwned<'local>, KeystoreError> {
    match env.call_static_method(class, name, sig, args) {
        Ok(value) => Ok(value),
        Err(e) => Err(jni_failure(env, name, e)),
    }
}

fn new_object<'local>(
    env: &mut JNIEnv<'local>,
    class: &str,
    sig: &str,
    args: &[JValue<'_, '_>],
) -> Result<JObject<'local>, KeystoreError> {
    match env.new_object(class, sig, args) {
        Ok(obj) => Ok(obj),
        Err(e) => Err(jni_failure(env, class, e)),
    }
}

fn object<'local>(value: JValueOwned<'local>) -> Result<JObject<'local>, KeystoreError> {
    value.l().map_err(|e| KeystoreError::HardwareNotAvailable {
        reason: format!("Object conversion failed: {e}"),
    })
}

fn jstring<'local>(
    env: &mut JNIEnv<'local>,
    value: &str,
) -> Result<JObject<'local>, KeystoreError> {
    let s = env
        .new_string(value)
        .map_err(|e| KeystoreError::HardwareNotAvailable {
            reason: format!("JNI string creation failed: {e}"),
        })?;
    Ok(JObject::from(s))
}

fn string_array<'local>(
    env: &mut JNIEnv<'local>,
    value: &str,
) -> Result<JObject<'local>, KeystoreError> {
    let element = jstring(env, value)?;
    let array = env
        .new_object_array(1, "java/lang/String", &element)
        .map_err(|e| KeystoreError::HardwareNotAvailable {
            reason: format!("String array creation failed: {e}"),
        })?;
    Ok(JObject::from(array))
}

fn byte_array_result(
    env: &mut JNIEnv<'_>,
    value: JValueOwned<'_>,
) -> Result<Vec<u8>, KeystoreError> {
    let array: JByteArray = object(value)?.into();
    env.convert_byte_array(array)
        .map_err(|e| KeystoreError::HardwareNotAvailable {
            reason: format!("Byte array conversion failed: {e}"),
        })
}

fn get_keystore<'local>(env: &mut JNIEnv<'local>) -> Result<JObject<'local>, KeystoreError> {
    debug!("get_keystore: loading AndroidKeyStore");
    let provider = jstring(env, KEYSTORE_PROVIDER)?;
    let keystore = object(call_static(
        env,
        "java/security/KeyStore",
        "getInstance",
        "(Ljava/lang/String;)Ljava/security/KeyStore;",
        &[JValue::Object(&provider)],
    )?)?;

    call(
        env,
        &keystore,
        "load",
        "(Ljava/security/KeyStore$LoadStoreParameter;)V",
        &[JValue::Object(&JObject::null())],
    )?;
    Ok(keystore)
}

/// Creation time of the entry in milliseconds, used as its generation.
fn creation_millis(
    env: &mut JNIEnv<'_>,
    keystore: &JObject<'_>,
    alias: &str,
) -> Result<Option<u64>, KeystoreError> {
    let alias_str = jstring(env, alias)?;
    let date = object(call(
        env,
        keystore,
        "getCreationDate",
        "(Ljava/lang/String;)Ljava/util/Date;",
        &[JValue::Object(&alias_str)],
    )?)?;
    if date.is_null() {
        return Ok(None);
    }

    let millis = call(env, &date, "getTime", "()J", &[])?
        .j()
        .map_err(|e| KeystoreError::platform(format!("Date conversion failed: {e}")))?;
    Ok(Some(millis.max(0).unsigned_abs()))
}

fn private_key<'local>(
    env: &mut JNIEnv<'local>,
    keystore: &JObject<'_>,
    handle: &KeyHandle,
) -> Result<JObject<'local>, KeystoreError> {
    if creation_millis(env, keystore, handle.alias())? != Some(handle.generation()) {
        return Err(KeystoreError::not_found(handle.alias()));
    }

    let alias_str = jstring(env, handle.alias())?;
    let key = object(call(
        env,
        keystore,
        "getKey",
        "(Ljava/lang/String;[C)Ljava/security/Key;",
        &[JValue::Object(&alias_str), JValue::Object(&JObject::null())],
    )?)?;
    if key.is_null() {
        return Err(KeystoreError::not_found(handle.alias()));
    }
    Ok(key)
}

// ============================================================================
// Device detection
// ============================================================================

/// Profile of the running device.
///
/// Reads `android.os.Build` and asks the package manager for the StrongBox
/// feature. Without a usable VM the build fields come from system
/// properties instead.
pub(crate) fn detect_device() -> DeviceProfile {
    match detect_over_jni() {
        Ok(profile) => profile,
        Err(e) => {
            warn!(error = %e, "detect: JNI unavailable, reading system properties");
            let (build, api_level) = BuildFingerprint::from_properties(system_property);
            DeviceProfile::android(api_level.unwrap_or(0), build, declares_strongbox_file())
        },
    }
}

fn detect_over_jni() -> Result<DeviceProfile, KeystoreError> {
    let mut env = get_java_vm()?.attach_current_thread()?;

    let build = BuildFingerprint {
        brand: build_field(&mut env, "BRAND")?,
        device: build_field(&mut env, "DEVICE")?,
        fingerprint: build_field(&mut env, "FINGERPRINT")?,
        hardware: build_field(&mut env, "HARDWARE")?,
        model: build_field(&mut env, "MODEL")?,
        manufacturer: build_field(&mut env, "MANUFACTURER")?,
        product: build_field(&mut env, "PRODUCT")?,
    };
    let sdk_int = match env.get_static_field(BUILD_VERSION, "SDK_INT", "I") {
        Ok(value) => value.i().map_err(|e| jni_failure(&mut env, "SDK_INT", e))?,
        Err(e) => return Err(jni_failure(&mut env, "SDK_INT", e)),
    };

    let secure_element = match declares_strongbox(&mut env) {
        Ok(declared) => declared,
        Err(e) => {
            warn!(error = %e, "detect: feature query failed, checking permission files");
            declares_strongbox_file()
        },
    };

    debug!(sdk_int, hardware = %build.hardware, secure_element, "detect: device probed over JNI");
    Ok(DeviceProfile::android(
        u32::try_from(sdk_int).unwrap_or(0),
        build,
        secure_element,
    ))
}

fn build_field(env: &mut JNIEnv<'_>, name: &str) -> Result<String, KeystoreError> {
    let value = match env.get_static_field(BUILD, name, "Ljava/lang/String;") {
        Ok(value) => value,
        Err(e) => return Err(jni_failure(env, name, e)),
    };
    let value = JString::from(object(value)?);
    if value.is_null() {
        return Ok(String::new());
    }
    let text = env
        .get_string(&value)
        .map_err(|e| KeystoreError::platform(format!("Build.{name} unreadable: {e}")))?;
    Ok(text.into())
}

/// `PackageManager.hasSystemFeature(FEATURE_STRONGBOX_KEYSTORE)`.
fn declares_strongbox(env: &mut JNIEnv<'_>) -> Result<bool, KeystoreError> {
    let application = object(call_static(
        env,
        "android/app/ActivityThread",
        "currentApplication",
        "()Landroid/app/Application;",
        &[],
    )?)?;
    if application.is_null() {
        return Err(KeystoreError::platform("no application context"));
    }
    let package_manager = object(call(
        env,
        &application,
        "getPackageManager",
        "()Landroid/content/pm/PackageManager;",
        &[],
    )?)?;
    let feature = jstring(env, STRONGBOX_FEATURE)?;
    call(
        env,
        &package_manager,
        "hasSystemFeature",
        "(Ljava/lang/String;)Z",
        &[JValue::Object(&feature)],
    )?
    .z()
    .map_err(|e| KeystoreError::platform(format!("Boolean conversion failed: {e}")))
}

/// Feature declarations installed as permission XML files.
fn declares_strongbox_file() -> bool {
    let feature_file = format!("{STRONGBOX_FEATURE}.xml");
    ["/vendor/etc/permissions", "/system/etc/permissions"]
        .iter()
        .any(|dir| std::path::Path::new(dir).join(&feature_file).exists())
}

fn system_property(name: &str) -> Option<String> {
    let name = CString::new(name).ok()?;
    let mut value = [0 as c_char; PROP_VALUE_MAX];
    // SAFETY: `name` is NUL terminated and `value` holds PROP_VALUE_MAX bytes,
    // the most the call writes.
    let len = unsafe { __system_property_get(name.as_ptr(), value.as_mut_ptr()) };
    let len = usize::try_from(len).ok().filter(|len| *len > 0)?;
    let bytes: Vec<u8> = value[..len.min(PROP_VALUE_MAX)].iter().map(|c| *c as u8).collect();
    String::from_utf8(bytes).ok()
}

/// Android Keystore backend.
pub struct AndroidKeystore {
    strongbox: bool,
}

impl AndroidKeystore {
    /// Create the backend. `strongbox` reports whether the device declares
    /// a StrongBox secure element.
    #[must_use]
    pub fn new(strongbox: bool) -> Self {
        if JAVA_VM.get().is_none() {
            warn!("AndroidKeystore: JNI not initialized yet");
        }
        info!(strongbox, "AndroidKeystore created");
        Self { strongbox }
    }

    fn generate_spec<'local>(
        env: &mut JNIEnv<'local>,
        alias: &str,
        strongbox: bool,
    ) -> Result<JObject<'local>, KeystoreError> {
        let alias_str = jstring(env, alias)?;
        let builder = new_object(
            env,
            KEYGEN_BUILDER,
            "(Ljava/lang/String;I)V",
            &[JValue::Object(&alias_str), JValue::Int(PURPOSE_SIGN_VERIFY)],
        )?;

        let key_size = i32::try_from(ProtectionPolicy::KEY_SIZE_BITS).unwrap_or(256);
        call(
            env,
            &builder,
            "setKeySize",
            &format!("(I){KEYGEN_BUILDER_RET}"),
            &[JValue::Int(key_size)],
        )?;

        let digests = string_array(env, ProtectionPolicy::DIGEST)?;
        call(
            env,
            &builder,
            "setDigests",
            &format!("([Ljava/lang/String;){KEYGEN_BUILDER_RET}"),
            &[JValue::Object(&digests)],
        )?;
        call(
            env,
            &builder,
            "setUserAuthenticationRequired",
            &format!("(Z){KEYGEN_BUILDER_RET}"),
            &[JValue::Bool(1)],
        )?;
        call(
            env,
            &builder,
            "setUserAuthenticationParameters",
            &format!("(II){KEYGEN_BUILDER_RET}"),
            &[
                JValue::Int(ProtectionPolicy::AUTH_VALIDITY_SECONDS as i32),
                JValue::Int(AUTH_BIOMETRIC_STRONG),
            ],
        )?;
        call(
            env,
            &builder,
            "setInvalidatedByBiometricEnrollment",
            &format!("(Z){KEYGEN_BUILDER_RET}"),
            &[JValue::Bool(0)],
        )?;
        call(
            env,
            &builder,
            "setIsStrongBoxBacked",
            &format!("(Z){KEYGEN_BUILDER_RET}"),
            &[JValue::Bool(u8::from(strongbox))],
        )?;

        object(call(
            env,
            &builder,
            "build",
            "()Landroid/security/keystore/KeyGenParameterSpec;",
            &[],
        )?)
    }

    fn generate_with(
        env: &mut JNIEnv<'_>,
        alias: &str,
        strongbox: bool,
    ) -> Result<(), KeystoreError> {
        let spec = Self::generate_spec(env, alias, strongbox)?;
        let algorithm = jstring(env, "EC")?;
        let provider = jstring(env, KEYSTORE_PROVIDER)?;
        let generator = object(call_static(
            env,
            "java/security/KeyPairGenerator",
            "getInstance",
            "(Ljava/lang/String;Ljava/lang/String;)Ljava/security/KeyPairGenerator;",
            &[JValue::Object(&algorithm), JValue::Object(&provider)],
        )?)?;

        call(
            env,
            &generator,
            "initialize",
            "(Ljava/security/spec/AlgorithmParameterSpec;)V",
            &[JValue::Object(&spec)],
        )?;
        call(
            env,
            &generator,
            "generateKeyPair",
            "()Ljava/security/KeyPair;",
            &[],
        )?;
        Ok(())
    }

    fn protection<'local>(
        env: &mut JNIEnv<'local>,
        strongbox: bool,
    ) -> Result<JObject<'local>, KeystoreError> {
        let builder = new_object(
            env,
            PROTECTION_BUILDER,
            "(I)V",
            &[JValue::Int(PURPOSE_SIGN_VERIFY)],
        )?;

        let digests = string_array(env, ProtectionPolicy::DIGEST)?;
        call(
            env,
            &builder,
            "setDigests",
            &format!("([Ljava/lang/String;){PROTECTION_BUILDER_RET}"),
            &[JValue::Object(&digests)],
        )?;
        call(
            env,
            &builder,
            "setUserAuthenticationRequired",
            &format!("(Z){PROTECTION_BUILDER_RET}"),
            &[JValue::Bool(1)],
        )?;
        call(
            env,
            &builder,
            "setUserAuthenticationParameters",
            &format!("(II){PROTECTION_BUILDER_RET}"),
            &[
                JValue::Int(ProtectionPolicy::AUTH_VALIDITY_SECONDS as i32),
                JValue::Int(AUTH_BIOMETRIC_STRONG),
            ],
        )?;
        call(
            env,
            &builder,
            "setInvalidatedByBiometricEnrollment",
            &format!("(Z){PROTECTION_BUILDER_RET}"),
            &[JValue::Bool(0)],
        )?;
        call(
            env,
            &builder,
            "setIsStrongBoxBacked",
            &format!("(Z){PROTECTION_BUILDER_RET}"),
            &[JValue::Bool(u8::from(strongbox))],
        )?;

        object(call(
            env,
            &builder,
            "build",
            "()Landroid/security/keystore/KeyProtection;",
            &[],
        )?)
    }

    /// Build a `PrivateKeyEntry` (key plus self-signed certificate) for an
    /// imported scalar.
    fn private_key_entry<'local>(
        env: &mut JNIEnv<'local>,
        scalar: &[u8],
    ) -> Result<JObject<'local>, KeystoreError> {
        let signing_key = SigningKey::from_slice(scalar)
            .map_err(|e| KeystoreError::invalid_key(format!("private scalar rejected: {e}")))?;
        let pkcs8 = signing_key
            .to_pkcs8_der()
            .map_err(|e| KeystoreError::ImportFailed {
                reason: format!("PKCS8 encoding failed: {e}"),
            })?;
        let certificate = CertificateIssuer::new().self_sign(&signing_key)?;

        let pkcs8_array = env
            .byte_array_from_slice(pkcs8.as_bytes())
            .map_err(|e| KeystoreError::platform(format!("byte array creation failed: {e}")))?;
        let spec = new_object(
            env,
            "java/security/spec/PKCS8EncodedKeySpec",
            "([B)V",
            &[JValue::Object(&pkcs8_array)],
        )?;
        let algorithm = jstring(env, "EC")?;
        let factory = object(call_static(
            env,
            "java/security/KeyFactory",
            "getInstance",
            "(Ljava/lang/String;)Ljava/security/KeyFactory;",
            &[JValue::Object(&algorithm)],
        )?)?;
        let private_key = object(call(
            env,
            &factory,
            "generatePrivate",
            "(Ljava/security/spec/KeySpec;)Ljava/security/PrivateKey;",
            &[JValue::Object(&spec)],
        )?)?;

        let cert_array = env
            .byte_array_from_slice(certificate.as_der())
            .map_err(|e| KeystoreError::platform(format!("byte array creation failed: {e}")))?;
        let stream = new_object(
            env,
            "java/io/ByteArrayInputStream",
            "([B)V",
            &[JValue::Object(&cert_array)],
        )?;
        let cert_type = jstring(env, "X.509")?;
        let cert_factory = object(call_static(
            env,
            "java/security/cert/CertificateFactory",
            "getInstance",
            "(Ljava/lang/String;)Ljava/security/cert/CertificateFactory;",
            &[JValue::Object(&cert_type)],
        )?)?;
        let cert = object(call(
            env,
            &cert_factory,
            "generateCertificate",
            "(Ljava/io/InputStream;)Ljava/security/cert/Certificate;",
            &[JValue::Object(&stream)],
        )?)?;

        let chain = env
            .new_object_array(1, "java/security/cert/Certificate", &cert)
            .map_err(|e| KeystoreError::platform(format!("certificate array failed: {e}")))?;

        new_object(
            env,
            "java/security/KeyStore$PrivateKeyEntry",
            "(Ljava/security/PrivateKey;[Ljava/security/cert/Certificate;)V",
            &[JValue::Object(&private_key), JValue::Object(&chain)],
        )
    }

    fn import_with(
        env: &mut JNIEnv<'_>,
        keystore: &JObject<'_>,
        alias: &str,
        entry: &JObject<'_>,
        strongbox: bool,
    ) -> Result<(), KeystoreError> {
        let protection = Self::protection(env, strongbox)?;
        let alias_str = jstring(env, alias)?;
        call(
            env,
            keystore,
            "setEntry",
            SET_ENTRY_SIG,
            &[
                JValue::Object(&alias_str),
                JValue::Object(entry),
                JValue::Object(&protection),
            ],
        )?;
        Ok(())
    }

    fn handle_for(
        &self,
        env: &mut JNIEnv<'_>,
        keystore: &JObject<'_>,
        alias: &str,
        hardware_type: HardwareType,
    ) -> Result<KeyHandle, KeystoreError> {
        let generation = creation_millis(env, keystore, alias)?
            .ok_or_else(|| KeystoreError::not_found(alias))?;
        Ok(KeyHandle::new(alias, generation, hardware_type))
    }

    fn contains(
        env: &mut JNIEnv<'_>,
        keystore: &JObject<'_>,
        alias: &str,
    ) -> Result<bool, KeystoreError> {
        let alias_str = jstring(env, alias)?;
        call(
            env,
            keystore,
            "containsAlias",
            "(Ljava/lang/String;)Z",
            &[JValue::Object(&alias_str)],
        )?
        .z()
        .map_err(|e| KeystoreError::platform(format!("Boolean conversion failed: {e}")))
    }
}

impl KeystoreBackend for AndroidKeystore {
    fn hardware_type(&self) -> HardwareType {
        if self.strongbox {
            HardwareType::StrongBox
        } else {
            HardwareType::TrustedEnvironment
        }
    }

    fn generate(
        &self,
        alias: &str,
        policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;

        if Self::contains(&mut env, &keystore, alias)? {
            return Err(KeystoreError::KeyAlreadyExists {
                alias: alias.to_string(),
            });
        }

        let strongbox = policy.prefer_secure_element() && self.strongbox;
        info!(alias = %alias, strongbox, "generate: creating EC P-256 key in AndroidKeyStore");

        let hardware_type = match Self::generate_with(&mut env, alias, strongbox) {
            Ok(()) if strongbox => HardwareType::StrongBox,
            Ok(()) => HardwareType::TrustedEnvironment,
            Err(e) if strongbox => {
                warn!(alias = %alias, error = %e, "generate: StrongBox unavailable, using TEE");
                Self::generate_with(&mut env, alias, false).map_err(|e| {
                    KeystoreError::KeyGenerationFailed {
                        reason: e.to_string(),
                    }
                })?;
                HardwareType::TrustedEnvironment
            },
            Err(e) => {
                return Err(KeystoreError::KeyGenerationFailed {
                    reason: e.to_string(),
                })
            },
        };

        self.handle_for(&mut env, &keystore, alias, hardware_type)
    }

    fn import(
        &self,
        alias: &str,
        key: &RawImportKey,
        policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        let scalar = key
            .private_scalar()
            .ok_or_else(|| KeystoreError::invalid_key("only EC P-256 keys can be imported"))?;

        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        let strongbox = policy.prefer_secure_element() && self.strongbox;
        let entry = Self::private_key_entry(&mut env, scalar)?;

        let stored = Self::import_with(&mut env, &keystore, alias, &entry, strongbox);
        let hardware_type = match stored {
            Ok(()) if strongbox => HardwareType::StrongBox,
            Ok(()) => HardwareType::TrustedEnvironment,
            Err(e) if strongbox => {
                warn!(alias = %alias, error = %e, "import: StrongBox refused key, using TEE");
                Self::import_with(&mut env, &keystore, alias, &entry, false).map_err(|e| {
                    KeystoreError::ImportFailed {
                        reason: e.to_string(),
                    }
                })?;
                HardwareType::TrustedEnvironment
            },
            Err(e) => {
                return Err(KeystoreError::ImportFailed {
                    reason: e.to_string(),
                })
            },
        };

        info!(
            alias = %alias,
            hardware_type = ?hardware_type,
            "import: key stored in AndroidKeyStore"
        );
        self.handle_for(&mut env, &keystore, alias, hardware_type)
    }

    fn locate(&self, alias: &str) -> Result<Option<KeyHandle>, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        Ok(creation_millis(&mut env, &keystore, alias)?
            .map(|generation| KeyHandle::new(alias, generation, self.hardware_type())))
    }

    fn attributes(&self, handle: &KeyHandle) -> Result<KeyAttributes, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        let key = private_key(&mut env, &keystore, handle)?;

        let algorithm = object(call(&mut env, &key, "getAlgorithm", "()Ljava/lang/String;", &[])?)?;
        let provider = jstring(&mut env, KEYSTORE_PROVIDER)?;
        let factory = object(call_static(
            &mut env,
            "java/security/KeyFactory",
            "getInstance",
            "(Ljava/lang/String;Ljava/lang/String;)Ljava/security/KeyFactory;",
            &[JValue::Object(&algorithm), JValue::Object(&provider)],
        )?)?;

        let key_info_class = env
            .find_class("android/security/keystore/KeyInfo")
            .map_err(|e| KeystoreError::platform(format!("KeyInfo class not found: {e}")))?;
        let info = object(call(
            &mut env,
            &factory,
            "getKeySpec",
            "(Ljava/security/Key;Ljava/lang/Class;)Ljava/security/spec/KeySpec;",
            &[JValue::Object(&key), JValue::Object(&key_info_class)],
        )?)?;

        let inside_secure_hardware = call(&mut env, &info, "isInsideSecureHardware", "()Z", &[])?
            .z()
            .map_err(|e| KeystoreError::platform(e.to_string()))?;
        let auth_enforced = call(
            &mut env,
            &info,
            "isUserAuthenticationRequirementEnforcedBySecureHardware",
            "()Z",
            &[],
        )?
        .z()
        .map_err(|e| KeystoreError::platform(e.to_string()))?;

        Ok(KeyAttributes {
            hardware_type: handle.hardware_type(),
            inside_secure_hardware,
            auth_enforced_by_secure_hardware: auth_enforced,
        })
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        if creation_millis(&mut env, &keystore, handle.alias())? != Some(handle.generation()) {
            return Err(KeystoreError::not_found(handle.alias()));
        }

        let alias_str = jstring(&mut env, handle.alias())?;
        let cert = object(call(
            &mut env,
            &keystore,
            "getCertificate",
            "(Ljava/lang/String;)Ljava/security/cert/Certificate;",
            &[JValue::Object(&alias_str)],
        )?)?;
        if cert.is_null() {
            return Err(KeystoreError::not_found(handle.alias()));
        }

        let public_key = object(call(
            &mut env,
            &cert,
            "getPublicKey",
            "()Ljava/security/PublicKey;",
            &[],
        )?)?;
        let encoded = call(&mut env, &public_key, "getEncoded", "()[B", &[])?;
        byte_array_result(&mut env, encoded)
    }

    fn delete(&self, alias: &str) -> Result<bool, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        if !Self::contains(&mut env, &keystore, alias)? {
            return Ok(false);
        }

        let alias_str = jstring(&mut env, alias)?;
        call(
            &mut env,
            &keystore,
            "deleteEntry",
            "(Ljava/lang/String;)V",
            &[JValue::Object(&alias_str)],
        )?;
        info!(alias = %alias, "Key deleted from AndroidKeyStore");
        Ok(true)
    }

    fn begin_signature(
        &self,
        handle: &KeyHandle,
    ) -> Result<Box<dyn SigningSession>, KeystoreError> {
        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        let key = private_key(&mut env, &keystore, handle)?;

        let algorithm = jstring(&mut env, SIGNATURE_ALGORITHM)?;
        let signature = object(call_static(
            &mut env,
            "java/security/Signature",
            "getInstance",
            "(Ljava/lang/String;)Ljava/security/Signature;",
            &[JValue::Object(&algorithm)],
        )?)?;
        call(
            &mut env,
            &signature,
            "initSign",
            "(Ljava/security/PrivateKey;)V",
            &[JValue::Object(&key)],
        )
        .map_err(|e| KeystoreError::signing(format!("initSign failed: {e}")))?;

        let signature = env.new_global_ref(&signature)?;
        let session = AndroidSession {
            id: next_session_id(),
            handle: handle.clone(),
            signature,
        };
        debug!(alias = %handle.alias(), session_id = session.id, "Signature context bound");
        Ok(Box::new(session))
    }
}

/// An initialized `java.security.Signature` awaiting authorization.
struct AndroidSession {
    id: u64,
    handle: KeyHandle,
    signature: GlobalRef,
}

impl SigningSession for AndroidSession {
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

        let mut env = get_java_vm()?.attach_current_thread()?;
        let keystore = get_keystore(&mut env)?;
        if creation_millis(&mut env, &keystore, self.handle.alias())?
            != Some(self.handle.generation())
        {
            return Err(KeystoreError::not_found(self.handle.alias()));
        }

        let data = env
            .byte_array_from_slice(payload)
            .map_err(|e| KeystoreError::signing(format!("byte array creation failed: {e}")))?;
        let signature = self.signature.as_obj();
        call(&mut env, signature, "update", "([B)V", &[JValue::Object(&data)])
            .map_err(|e| KeystoreError::signing(e.to_string()))?;
        let signed = call(&mut env, signature, "sign", "()[B", &[])
            .map_err(|e| KeystoreError::signing(e.to_string()))?;
        let der = byte_array_result(&mut env, signed)?;

        info!(alias = %self.handle.alias(), sig_len = der.len(), "Signature created");
        Ok(der)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Host-registered prompt bridge object.
static PROMPT_BRIDGE: RwLock<Option<GlobalRef>> = RwLock::new(None);

/// Challenges shown but not yet answered, keyed by session id.
fn pending_challenges() -> &'static Mutex<HashMap<u64, ChallengeResolver>> {
    static PENDING: OnceLock<Mutex<HashMap<u64, ChallengeResolver>>> = OnceLock::new();
    PENDING.get_or_init(|| Mutex::new(HashMap::new()))
}

fn take_pending(session_id: u64) -> Option<ChallengeResolver> {
    let resolver = pending_challenges()
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&session_id));
    if resolver.is_none() {
        debug!(session_id, "prompt callback for a challenge that is no longer pending");
    }
    resolver
}

fn session_key(session_id: jlong) -> u64 {
    session_id.max(0).unsigned_abs()
}

/// Register the host's prompt bridge.
pub fn register_prompt_bridge(
    env: &mut JNIEnv<'_>,
    bridge: &JObject<'_>,
) -> Result<(), KeystoreError> {
    let global = env.new_global_ref(bridge)?;
    let mut slot = PROMPT_BRIDGE.write().map_err(|_| KeystoreError::PlatformError {
        message: "Lock poisoned".into(),
    })?;
    *slot = Some(global);
    info!("register_prompt_bridge: prompt bridge registered");
    Ok(())
}

/// `PromptBridge.nativeRegister(this)`
#[no_mangle]
pub extern "system" fn Java_io_hwcrypto_PromptBridge_nativeRegister(
    mut env: JNIEnv<'_>,
    this: JObject<'_>,
) {
    if let Err(e) = register_prompt_bridge(&mut env, &this) {
        error!(error = %e, "nativeRegister failed");
    }
}

/// `BiometricPrompt.AuthenticationCallback.onAuthenticationSucceeded`
#[no_mangle]
pub extern "system" fn Java_io_hwcrypto_PromptBridge_nativeOnSucceeded(
    _env: JNIEnv<'_>,
    _class: JClass<'_>,
    session_id: jlong,
) {
    if let Some(resolver) = take_pending(session_key(session_id)) {
        resolver.succeed();
    }
}

/// `BiometricPrompt.AuthenticationCallback.onAuthenticationError`
#[no_mangle]
pub extern "system" fn Java_io_hwcrypto_PromptBridge_nativeOnError(
    mut env: JNIEnv<'_>,
    _class: JClass<'_>,
    session_id: jlong,
    code: jint,
    message: JString<'_>,
) {
    let message: String = env
        .get_string(&message)
        .map(Into::into)
        .unwrap_or_default();
    if let Some(resolver) = take_pending(session_key(session_id)) {
        resolver.error(code, message);
    }
}

/// `BiometricPrompt.AuthenticationCallback.onAuthenticationFailed`
#[no_mangle]
pub extern "system" fn Java_io_hwcrypto_PromptBridge_nativeOnFailed(
    _env: JNIEnv<'_>,
    _class: JClass<'_>,
    session_id: jlong,
) {
    if let Some(resolver) = take_pending(session_key(session_id)) {
        resolver.fail();
    }
}

fn bridge() -> Result<GlobalRef, KeystoreError> {
    PROMPT_BRIDGE
        .read()
        .map_err(|_| KeystoreError::PlatformError {
            message: "Lock poisoned".into(),
        })?
        .clone()
        .ok_or_else(|| KeystoreError::HardwareNotAvailable {
            reason: "No prompt bridge registered".into(),
        })
}

fn cancel_prompt(session_id: u64) {
    if let Ok(mut pending) = pending_challenges().lock() {
        pending.remove(&session_id);
    }

    let result = (|| -> Result<(), KeystoreError> {
        let bridge = bridge()?;
        let mut env = get_java_vm()?.attach_current_thread()?;
        let id = i64::try_from(session_id).unwrap_or(i64::MAX);
        call(&mut env, bridge.as_obj(), "cancel", "(J)V", &[JValue::Long(id)])?;
        Ok(())
    })();

    match result {
        Ok(()) => debug!(session_id, "BiometricPrompt cancelled"),
        Err(e) => warn!(session_id, error = %e, "BiometricPrompt cancel failed"),
    }
}

/// Biometric-strong `BiometricPrompt` driven through the host bridge.
#[derive(Debug, Default)]
pub struct AndroidBiometricAuthenticator;

impl AndroidBiometricAuthenticator {
    /// Create the authenticator. The bridge may be registered later.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BiometricAuthenticator for AndroidBiometricAuthenticator {
    fn authenticate(
        &self,
        request: &PromptRequest,
        session: &dyn SigningSession,
    ) -> Result<PendingChallenge, KeystoreError> {
        let android_session = session
            .as_any()
            .downcast_ref::<AndroidSession>()
            .ok_or_else(|| KeystoreError::platform("session was not opened by AndroidKeystore"))?;
        let session_id = android_session.id;
        let bridge = bridge()?;

        let (resolver, pending) = challenge_channel(session_id);
        pending_challenges()
            .lock()
            .map_err(|_| KeystoreError::PlatformError {
                message: "Lock poisoned".into(),
            })?
            .insert(session_id, resolver);

        let shown = (|| -> Result<(), KeystoreError> {
            let mut env = get_java_vm()?.attach_current_thread()?;
            let title = jstring(&mut env, &request.title)?;
            let subtitle = match &request.subtitle {
                Some(s) => jstring(&mut env, s)?,
                None => JObject::null(),
            };
            let negative = jstring(&mut env, &request.negative_button)?;
            let id = i64::try_from(session_id).unwrap_or(i64::MAX);
            call(
                &mut env,
                bridge.as_obj(),
                "authenticate",
                BRIDGE_AUTHENTICATE_SIG,
                &[
                    JValue::Long(id),
                    JValue::Object(&title),
                    JValue::Object(&subtitle),
                    JValue::Object(&negative),
                    JValue::Object(android_session.signature.as_obj()),
                ],
            )?;
            Ok(())
        })();

        if let Err(e) = shown {
            take_pending(session_id);
            return Err(e);
        }

        debug!(alias = %session.handle().alias(), session_id, "BiometricPrompt shown");
        Ok(pending.on_cancel(move || cancel_prompt(session_id)))
    }
}
