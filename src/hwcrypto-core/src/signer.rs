//! Biometric-gated signing.
//!
//! ```text
//! Idle ──locate + bind──> AwaitingAuthentication ──success──> Authenticated ──finish──> signature
//!                                   │
//!                                   ├── error / failure ──> Failed
//!                                   └── cancel / timeout ─> Cancelled
//! ```
//!
//! Awaiting the user is the only suspension point. Cancelling (explicitly,
//! by timeout, or by dropping the future) dismisses the platform prompt and
//! closes the challenge channel, so a late callback cannot deliver.

use std::sync::Arc;
use std::time::Duration;

use hwcrypto_keystore::{
    AuthOutcome, BiometricAuthenticator, KeystoreError, PromptRequest, SecureKeyStore,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::HardwareCryptoError;

/// State of one signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignState {
    /// Nothing bound yet.
    Idle,
    /// Signature context bound, prompt shown.
    AwaitingAuthentication,
    /// The user authenticated.
    Authenticated,
    /// The authenticator rejected the user.
    Failed,
    /// The request was cancelled before authentication completed.
    Cancelled,
}

/// Cancels the signing request it was issued with.
///
/// Dropping the handle without calling [`CancelHandle::cancel`] leaves the
/// request running.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancel the request. Has no effect once it has left
    /// `AwaitingAuthentication`.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self { rx: None }
    }

    async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Every handle dropped without cancelling.
                return std::future::pending().await;
            }
        }
    }
}

/// Create a linked cancel handle and signal.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelSignal { rx: Some(rx) },
    )
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Signs with a stored key after a user-presence challenge.
#[derive(Clone)]
pub struct AuthenticatedSigner {
    store: SecureKeyStore,
    authenticator: Arc<dyn BiometricAuthenticator>,
    prompt: PromptRequest,
    timeout: Option<Duration>,
}

impl AuthenticatedSigner {
    /// Create a signer over `store` using `authenticator` for the prompt.
    pub fn new(
        store: SecureKeyStore,
        authenticator: Arc<dyn BiometricAuthenticator>,
        prompt: PromptRequest,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            authenticator,
            prompt,
            timeout,
        }
    }

    /// Sign `payload` with the key under `alias`.
    ///
    /// Returns a DER-encoded ECDSA signature over SHA-256(`payload`).
    pub async fn sign(
        &self,
        alias: &str,
        payload: Vec<u8>,
        mut cancel: CancelSignal,
    ) -> Result<Vec<u8>, HardwareCryptoError> {
        let mut state = SignState::Idle;
        debug!(alias = %alias, state = ?state, payload_len = payload.len(), "sign: start");

        let handle = self.store.locate(alias)?;
        let session = self.store.begin_signature(&handle)?;

        let mut challenge = self
            .authenticator
            .authenticate(&self.prompt, session.as_ref())?;
        transition(alias, &mut state, SignState::AwaitingAuthentication);

        let outcome = tokio::select! {
            outcome = &mut challenge => Some(outcome),
            () = cancel.cancelled() => {
                debug!(alias = %alias, "sign: cancelled by caller");
                None
            },
            () = deadline(self.timeout) => {
                debug!(alias = %alias, timeout = ?self.timeout, "sign: authentication timed out");
                None
            },
        };

        let authorization = match outcome {
            None => {
                challenge.cancel();
                transition(alias, &mut state, SignState::Cancelled);
                return Err(HardwareCryptoError::AuthenticationCancelled);
            },
            Some(AuthOutcome::Succeeded(authorization)) => {
                transition(alias, &mut state, SignState::Authenticated);
                authorization
            },
            Some(AuthOutcome::Error { code, message }) => {
                transition(alias, &mut state, SignState::Failed);
                warn!(alias = %alias, code, reason = %message, "sign: authenticator error");
                return Err(HardwareCryptoError::AuthenticationFailed {
                    reason: format!("{message} (code {code})"),
                });
            },
            Some(AuthOutcome::Failed) => {
                transition(alias, &mut state, SignState::Failed);
                return Err(HardwareCryptoError::AuthenticationFailed {
                    reason: "authentication failed for an unknown reason".into(),
                });
            },
        };

        let finished =
            tokio::task::spawn_blocking(move || session.finish(&authorization, &payload))
                .await
                .map_err(|e| HardwareCryptoError::SignatureFailure {
                    reason: format!("signing task failed: {e}"),
                })?;

        let signature = finished.map_err(|e| {
            warn!(alias = %alias, error = %e, "sign: finish failed");
            match e {
                KeystoreError::KeyNotFound { .. }
                | KeystoreError::AuthenticationFailed { .. }
                | KeystoreError::AuthenticationCancelled => HardwareCryptoError::from(e),
                other => HardwareCryptoError::SignatureFailure {
                    reason: other.to_string(),
                },
            }
        })?;

        debug!(alias = %alias, sig_len = signature.len(), "sign: done");
        Ok(signature)
    }
}

fn transition(alias: &str, state: &mut SignState, next: SignState) {
    debug!(alias = %alias, from = ?*state, to = ?next, "sign: state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcrypto_keystore::{EmulatedAuthenticator, EmulatedKeystore, EnforcementMode};

    fn signer(auth: Arc<EmulatedAuthenticator>, timeout: Option<Duration>) -> AuthenticatedSigner {
        let backend = Arc::new(
            EmulatedKeystore::in_memory().with_enforcement(EnforcementMode::SecureHardware),
        );
        let store = SecureKeyStore::new(backend, false);
        store.generate("k").unwrap();
        AuthenticatedSigner::new(store, auth, PromptRequest::default(), timeout)
    }

    #[tokio::test]
    async fn test_approved_sign() {
        let signer = signer(Arc::new(EmulatedAuthenticator::approving()), None);
        let sig = signer.sign("k", b"hello".to_vec(), CancelSignal::never()).await.unwrap();
        assert!(!sig.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_cancels() {
        let auth = Arc::new(EmulatedAuthenticator::holding());
        let signer = signer(Arc::clone(&auth), Some(Duration::from_millis(20)));

        let result = signer.sign("k", b"x".to_vec(), CancelSignal::never()).await;
        assert!(matches!(result, Err(HardwareCryptoError::AuthenticationCancelled)));
        assert_eq!(auth.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let auth = Arc::new(EmulatedAuthenticator::holding());
        let signer = signer(Arc::clone(&auth), None);
        let (handle, signal) = cancel_pair();
        handle.cancel();
        assert!(handle.is_cancelled());

        let result = signer.sign("k", b"x".to_vec(), signal).await;
        assert!(matches!(result, Err(HardwareCryptoError::AuthenticationCancelled)));
        assert!(!auth.approve_next());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel() {
        let signer = signer(Arc::new(EmulatedAuthenticator::approving()), None);
        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(signer.sign("k", b"x".to_vec(), signal).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let signer = signer(Arc::new(EmulatedAuthenticator::approving()), None);
        assert!(matches!(
            signer.sign("missing", b"x".to_vec(), CancelSignal::never()).await,
            Err(HardwareCryptoError::KeyNotFound { .. })
        ));
    }
}
