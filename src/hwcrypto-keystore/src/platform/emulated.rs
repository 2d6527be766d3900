//! Emulated keystore and prompt for simulators and development hosts.
//!
//! WARNING: keys held here have NO hardware binding. The private scalar is
//! kept in process memory and, for persistent stores, in a JSON file per
//! key. Use only where no secure hardware exists: simulators, desktop
//! development, tests.
//!
//! Signatures are real ECDSA P-256 over SHA-256, DER encoded, so anything
//! built against this backend verifies the same way as on hardware.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use hwcrypto_codec::{CertificateIssuer, RawImportKey};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey};
use p256::elliptic_curve::rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::challenge::{
    challenge_channel, Authorization, BiometricAuthenticator, ChallengeResolver, PendingChallenge,
    PromptRequest,
};
use crate::error::KeystoreError;
use crate::session::{check_authorization, next_session_id, SigningSession};
use crate::store::KeystoreBackend;
use crate::types::{HardwareType, KeyAttributes, KeyHandle, ProtectionPolicy};

/// What the emulated keystore claims about authentication enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementMode {
    /// Report the truth: nothing enforces authentication.
    #[default]
    Software,
    /// Report hardware enforcement, to exercise the accepting path.
    SecureHardware,
    /// Report hardware enforcement for generated keys only, as keystores
    /// that cannot bind imported material to user authentication do.
    GeneratedOnly,
}

struct EmulatedEntry {
    generation: u64,
    signing_key: SigningKey,
    certificate: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
    imported: bool,
}

/// On-disk form of one entry.
#[derive(Serialize, Deserialize)]
struct EntryRecord {
    alias: String,
    generation: u64,
    scalar: String,
    certificate: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    imported: bool,
}

type EntryMap = Arc<RwLock<HashMap<String, EmulatedEntry>>>;

fn lock_poisoned() -> KeystoreError {
    KeystoreError::PlatformError {
        message: "Lock poisoned".into(),
    }
}

/// Software stand-in for a hardware keystore.
pub struct EmulatedKeystore {
    entries: EntryMap,
    next_generation: AtomicU64,
    store_dir: Option<PathBuf>,
    enforcement: EnforcementMode,
    require_certificate: bool,
}

impl EmulatedKeystore {
    /// A store that forgets everything when dropped.
    #[must_use]
    pub fn in_memory() -> Self {
        info!("EmulatedKeystore: in-memory store (no hardware binding)");
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            store_dir: None,
            enforcement: EnforcementMode::default(),
            require_certificate: false,
        }
    }

    /// A store persisted under `dir`, loading any keys already there.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut entries = HashMap::new();
        let mut max_generation = 0;
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_record(&path) {
                Ok((alias, entry)) => {
                    max_generation = max_generation.max(entry.generation);
                    entries.insert(alias, entry);
                },
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable key file"),
            }
        }

        info!(
            dir = %dir.display(),
            keys = entries.len(),
            "EmulatedKeystore: persistent store (no hardware binding)"
        );

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            next_generation: AtomicU64::new(max_generation + 1),
            store_dir: Some(dir),
            enforcement: EnforcementMode::default(),
            require_certificate: false,
        })
    }

    /// Set the enforcement the store reports.
    #[must_use]
    pub fn with_enforcement(mut self, enforcement: EnforcementMode) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// Require a self-signed certificate with every imported key, as
    /// keystores that store private keys as certificate entries do.
    #[must_use]
    pub fn with_certificate_chain(mut self, require: bool) -> Self {
        self.require_certificate = require;
        self
    }

    /// Certificate stored with an imported key, if any.
    pub fn certificate(&self, alias: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        Ok(entries.get(alias).and_then(|e| e.certificate.clone()))
    }

    /// Creation time of the entry for `alias`.
    pub fn created_at(&self, alias: &str) -> Result<Option<DateTime<Utc>>, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        Ok(entries.get(alias).map(|e| e.created_at))
    }

    /// Aliases currently stored, sorted.
    pub fn aliases(&self) -> Result<Vec<String>, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        let mut aliases: Vec<String> = entries.keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    }

    fn insert(
        &self,
        alias: &str,
        signing_key: SigningKey,
        certificate: Option<Vec<u8>>,
        imported: bool,
    ) -> Result<KeyHandle, KeystoreError> {
        let mut entries = self.entries.write().map_err(|_| lock_poisoned())?;
        if !imported && entries.contains_key(alias) {
            return Err(KeystoreError::KeyAlreadyExists {
                alias: alias.to_string(),
            });
        }

        let entry = EmulatedEntry {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            signing_key,
            certificate,
            created_at: Utc::now(),
            imported,
        };

        if let Some(dir) = &self.store_dir {
            write_record(dir, alias, &entry)?;
        }

        let handle = KeyHandle::new(alias, entry.generation, HardwareType::Emulated);
        entries.insert(alias.to_string(), entry);
        Ok(handle)
    }

    fn signing_key(&self, handle: &KeyHandle) -> Result<SigningKey, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        current_key(&entries, handle)
    }

    fn is_imported(&self, handle: &KeyHandle) -> Result<bool, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        match entries.get(handle.alias()) {
            Some(entry) if entry.generation == handle.generation() => Ok(entry.imported),
            _ => Err(KeystoreError::not_found(handle.alias())),
        }
    }
}

impl KeystoreBackend for EmulatedKeystore {
    fn hardware_type(&self) -> HardwareType {
        HardwareType::Emulated
    }

    fn generate(
        &self,
        alias: &str,
        _policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        let handle = self.insert(alias, SigningKey::random(&mut OsRng), None, false)?;
        info!(alias = %alias, generation = handle.generation(), "emulated key generated");
        Ok(handle)
    }

    fn import(
        &self,
        alias: &str,
        key: &RawImportKey,
        _policy: &ProtectionPolicy,
    ) -> Result<KeyHandle, KeystoreError> {
        let scalar = key
            .private_scalar()
            .ok_or_else(|| KeystoreError::invalid_key("only EC P-256 keys can be imported"))?;
        let signing_key = SigningKey::from_slice(scalar)
            .map_err(|e| KeystoreError::invalid_key(format!("private scalar rejected: {e}")))?;

        let certificate = if self.require_certificate {
            Some(CertificateIssuer::new().self_sign(&signing_key)?.into_der())
        } else {
            None
        };

        let handle = self.insert(alias, signing_key, certificate, true)?;
        info!(alias = %alias, generation = handle.generation(), "emulated key imported");
        Ok(handle)
    }

    fn locate(&self, alias: &str) -> Result<Option<KeyHandle>, KeystoreError> {
        let entries = self.entries.read().map_err(|_| lock_poisoned())?;
        Ok(entries
            .get(alias)
            .map(|e| KeyHandle::new(alias, e.generation, HardwareType::Emulated)))
    }

    fn attributes(&self, handle: &KeyHandle) -> Result<KeyAttributes, KeystoreError> {
        let enforced = match self.enforcement {
            EnforcementMode::Software => {
                self.signing_key(handle)?;
                false
            },
            EnforcementMode::SecureHardware => {
                self.signing_key(handle)?;
                true
            },
            EnforcementMode::GeneratedOnly => !self.is_imported(handle)?,
        };
        Ok(KeyAttributes {
            hardware_type: HardwareType::Emulated,
            inside_secure_hardware: enforced,
            auth_enforced_by_secure_hardware: enforced,
        })
    }

    fn public_key(&self, handle: &KeyHandle) -> Result<Vec<u8>, KeystoreError> {
        let signing_key = self.signing_key(handle)?;
        let point = signing_key.verifying_key().to_encoded_point(false);
        Ok(point.as_bytes().to_vec())
    }

    fn delete(&self, alias: &str) -> Result<bool, KeystoreError> {
        let mut entries = self.entries.write().map_err(|_| lock_poisoned())?;

        // The record goes first: a failed removal must leave the key in place.
        if let Some(dir) = &self.store_dir {
            match fs::remove_file(record_path(dir, alias)) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }
        let removed = entries.remove(alias).is_some();

        debug!(alias = %alias, removed, "emulated key delete");
        Ok(removed)
    }

    fn begin_signature(
        &self,
        handle: &KeyHandle,
    ) -> Result<Box<dyn SigningSession>, KeystoreError> {
        self.signing_key(handle)?;
        let session = EmulatedSession {
            id: next_session_id(),
            handle: handle.clone(),
            entries: Arc::clone(&self.entries),
        };
        debug!(alias = %handle.alias(), session_id = session.id, "emulated signing session opened");
        Ok(Box::new(session))
    }
}

fn current_key(
    entries: &HashMap<String, EmulatedEntry>,
    handle: &KeyHandle,
) -> Result<SigningKey, KeystoreError> {
    match entries.get(handle.alias()) {
        Some(entry) if entry.generation == handle.generation() => Ok(entry.signing_key.clone()),
        _ => Err(KeystoreError::not_found(handle.alias())),
    }
}

/// Signing context over an emulated key.
///
/// The key is looked up again when the session finishes, so a key deleted
/// while the challenge was open yields `KeyNotFound`.
struct EmulatedSession {
    id: u64,
    handle: KeyHandle,
    entries: EntryMap,
}

impl SigningSession for EmulatedSession {
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

        let signing_key = {
            let entries = self.entries.read().map_err(|_| lock_poisoned())?;
            current_key(&entries, &self.handle)?
        };

        let signature: DerSignature = signing_key
            .try_sign(payload)
            .map_err(|e| KeystoreError::signing(e.to_string()))?;

        debug!(
            alias = %self.handle.alias(),
            session_id = self.id,
            payload_len = payload.len(),
            "emulated signature produced"
        );
        Ok(signature.as_bytes().to_vec())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn record_path(dir: &Path, alias: &str) -> PathBuf {
    let digest = Sha256::digest(alias.as_bytes());
    dir.join(format!("{}.json", hex::encode(digest)))
}

fn write_record(dir: &Path, alias: &str, entry: &EmulatedEntry) -> Result<(), KeystoreError> {
    let mut record = EntryRecord {
        alias: alias.to_string(),
        generation: entry.generation,
        scalar: hex::encode(entry.signing_key.to_bytes()),
        certificate: entry.certificate.as_ref().map(hex::encode),
        created_at: entry.created_at,
        imported: entry.imported,
    };
    let serialized = serde_json::to_vec_pretty(&record);
    record.scalar.zeroize();
    let json = Zeroizing::new(serialized?);

    let path = record_path(dir, alias);
    let tmp = path.with_extension("json.tmp");
    let mut file = private_file(&tmp)?;
    file.write_all(json.as_slice())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Open `path` for writing, readable by the owner only.
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn load_record(path: &Path) -> Result<(String, EmulatedEntry), KeystoreError> {
    let bytes = Zeroizing::new(fs::read(path)?);
    let mut record: EntryRecord = serde_json::from_slice(&bytes)?;

    let scalar = Zeroizing::new(
        hex::decode(&record.scalar)
            .map_err(|e| KeystoreError::storage(format!("bad scalar encoding: {e}")))?,
    );
    record.scalar.zeroize();
    let signing_key = SigningKey::from_slice(&scalar)
        .map_err(|e| KeystoreError::storage(format!("bad scalar: {e}")))?;
    let certificate = record
        .certificate
        .as_deref()
        .map(hex::decode)
        .transpose()
        .map_err(|e| KeystoreError::storage(format!("bad certificate encoding: {e}")))?;

    let entry = EmulatedEntry {
        generation: record.generation,
        signing_key,
        certificate,
        created_at: record.created_at,
        imported: record.imported,
    };
    Ok((record.alias, entry))
}

/// How the emulated prompt answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptBehavior {
    /// Authenticate immediately.
    Approve,
    /// Report an authenticator error immediately.
    Reject {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
    /// Give up immediately without a reason.
    Fail,
    /// Keep the prompt open until resolved through the authenticator.
    Hold,
}

/// Software stand-in for a biometric prompt.
///
/// With [`PromptBehavior::Hold`], challenges stay registered until one of
/// the `*_next` methods resolves them or the signer cancels. Cancelling
/// removes the registration.
pub struct EmulatedAuthenticator {
    behavior: PromptBehavior,
    held: Arc<Mutex<VecDeque<ChallengeResolver>>>,
}

impl EmulatedAuthenticator {
    /// Create a prompt with fixed behavior.
    #[must_use]
    pub fn new(behavior: PromptBehavior) -> Self {
        Self {
            behavior,
            held: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// A prompt that approves everything.
    #[must_use]
    pub fn approving() -> Self {
        Self::new(PromptBehavior::Approve)
    }

    /// A prompt that waits to be resolved.
    #[must_use]
    pub fn holding() -> Self {
        Self::new(PromptBehavior::Hold)
    }

    /// Number of open challenges.
    pub fn pending(&self) -> usize {
        self.held
            .lock()
            .map(|held| held.iter().filter(|r| !r.is_cancelled()).count())
            .unwrap_or(0)
    }

    /// Approve the oldest open challenge.
    pub fn approve_next(&self) -> bool {
        self.take_next().is_some_and(ChallengeResolver::succeed)
    }

    /// Reject the oldest open challenge with an error.
    pub fn reject_next(&self, code: i32, message: &str) -> bool {
        self.take_next().is_some_and(|r| r.error(code, message))
    }

    /// Fail the oldest open challenge without a reason.
    pub fn fail_next(&self) -> bool {
        self.take_next().is_some_and(ChallengeResolver::fail)
    }

    fn take_next(&self) -> Option<ChallengeResolver> {
        let mut held = self.held.lock().ok()?;
        while let Some(resolver) = held.pop_front() {
            if !resolver.is_cancelled() {
                return Some(resolver);
            }
        }
        None
    }
}

impl BiometricAuthenticator for EmulatedAuthenticator {
    fn authenticate(
        &self,
        request: &PromptRequest,
        session: &dyn SigningSession,
    ) -> Result<PendingChallenge, KeystoreError> {
        let session_id = session.session_id();
        let (resolver, pending) = challenge_channel(session_id);
        debug!(
            alias = %session.handle().alias(),
            session_id,
            title = %request.title,
            behavior = ?self.behavior,
            "emulated prompt shown"
        );

        match &self.behavior {
            PromptBehavior::Approve => {
                resolver.succeed();
            },
            PromptBehavior::Reject { code, message } => {
                resolver.error(*code, message.clone());
            },
            PromptBehavior::Fail => {
                resolver.fail();
            },
            PromptBehavior::Hold => {
                self.held.lock().map_err(|_| lock_poisoned())?.push_back(resolver);
                let held = Arc::clone(&self.held);
                return Ok(pending.on_cancel(move || {
                    if let Ok(mut held) = held.lock() {
                        held.retain(|r| r.session_id() != session_id);
                    }
                    debug!(session_id, "emulated prompt dismissed");
                }));
            },
        }

        Ok(pending)
    }
}
