//! User-presence challenges.
//!
//! A platform authenticator (biometric prompt) is driven through a single
//! resolution channel. The platform side holds a [`ChallengeResolver`] and
//! reports exactly one outcome; the signing side awaits a
//! [`PendingChallenge`]. Dropping or cancelling the pending side runs the
//! platform's cancel primitive and closes the channel, so a late platform
//! callback has nowhere to deliver to.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::KeystoreError;
use crate::session::SigningSession;
use crate::types::AssuranceClass;

/// Text and constraints for the platform prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Prompt title.
    pub title: String,
    /// Optional subtitle.
    pub subtitle: Option<String>,
    /// Label of the dismiss button.
    pub negative_button: String,
    /// Accepted authenticator strength.
    pub assurance: AssuranceClass,
}

impl Default for PromptRequest {
    fn default() -> Self {
        Self {
            title: "Authenticate".to_string(),
            subtitle: Some("Confirm your identity to sign".to_string()),
            negative_button: "Cancel".to_string(),
            assurance: AssuranceClass::BiometricStrong,
        }
    }
}

/// Proof that a user-presence check succeeded for one signing session.
///
/// Only a [`ChallengeResolver`] can mint one, and it is bound to the
/// session the challenge was raised for.
#[derive(Debug, PartialEq, Eq)]
pub struct Authorization {
    session_id: u64,
}

impl Authorization {
    /// Session this authorization unlocks.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

/// How a challenge ended.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user authenticated.
    Succeeded(Authorization),
    /// The authenticator reported an error (lockout, no enrollment, user
    /// dismissal, hardware fault).
    Error {
        /// Platform error code.
        code: i32,
        /// Platform error message.
        message: String,
    },
    /// The authenticator gave up without a specific reason.
    Failed,
}

/// Platform side of a challenge. Resolves it exactly once.
pub struct ChallengeResolver {
    tx: oneshot::Sender<AuthOutcome>,
    session_id: u64,
}

impl ChallengeResolver {
    /// Session the challenge is bound to.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Whether the awaiting side is gone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Report success. Returns `false` if the challenge was already cancelled.
    pub fn succeed(self) -> bool {
        let outcome = AuthOutcome::Succeeded(Authorization {
            session_id: self.session_id,
        });
        self.resolve(outcome)
    }

    /// Report an authenticator error.
    pub fn error(self, code: i32, message: impl Into<String>) -> bool {
        let outcome = AuthOutcome::Error {
            code,
            message: message.into(),
        };
        self.resolve(outcome)
    }

    /// Report an unspecified failure.
    pub fn fail(self) -> bool {
        self.resolve(AuthOutcome::Failed)
    }

    fn resolve(self, outcome: AuthOutcome) -> bool {
        let session_id = self.session_id;
        let delivered = self.tx.send(outcome).is_ok();
        if !delivered {
            debug!(session_id, "challenge resolved after cancellation, dropped");
        }
        delivered
    }
}

impl fmt::Debug for ChallengeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResolver")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// Signing side of a challenge.
///
/// Resolves to the [`AuthOutcome`]. A resolver dropped without reporting
/// counts as [`AuthOutcome::Failed`].
pub struct PendingChallenge {
    rx: oneshot::Receiver<AuthOutcome>,
    on_cancel: Option<CancelHook>,
}

impl PendingChallenge {
    /// Attach the platform cancel primitive, run if the challenge is
    /// cancelled or dropped before it resolves.
    #[must_use]
    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Cancel the challenge now.
    pub fn cancel(mut self) {
        self.run_cancel_hook();
    }

    fn run_cancel_hook(&mut self) {
        self.rx.close();
        if let Some(hook) = self.on_cancel.take() {
            debug!("pending challenge cancelled, dismissing platform prompt");
            hook();
        }
    }
}

impl Future for PendingChallenge {
    type Output = AuthOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.on_cancel = None;
                Poll::Ready(result.unwrap_or(AuthOutcome::Failed))
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingChallenge {
    fn drop(&mut self) {
        self.run_cancel_hook();
    }
}

impl fmt::Debug for PendingChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChallenge")
            .field("armed", &self.on_cancel.is_some())
            .finish()
    }
}

/// Create a challenge bound to `session_id`.
#[must_use]
pub fn challenge_channel(session_id: u64) -> (ChallengeResolver, PendingChallenge) {
    let (tx, rx) = oneshot::channel();
    (
        ChallengeResolver { tx, session_id },
        PendingChallenge {
            rx,
            on_cancel: None,
        },
    )
}

/// A platform authenticator that can present a user-presence challenge.
///
/// Implementations present the prompt bound to the signing session (on
/// Android, the session's `Signature` object becomes the prompt's crypto
/// object) and return immediately; the outcome arrives through the
/// returned [`PendingChallenge`].
pub trait BiometricAuthenticator: Send + Sync {
    /// Present a challenge for `session`.
    fn authenticate(
        &self,
        request: &PromptRequest,
        session: &dyn SigningSession,
    ) -> Result<PendingChallenge, KeystoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_carries_session() {
        let (resolver, pending) = challenge_channel(9);
        assert!(resolver.succeed());
        match pending.await {
            AuthOutcome::Succeeded(auth) => assert_eq!(auth.session_id(), 9),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_resolver_is_failure() {
        let (resolver, pending) = challenge_channel(1);
        drop(resolver);
        assert_eq!(pending.await, AuthOutcome::Failed);
    }

    #[tokio::test]
    async fn test_error_outcome() {
        let (resolver, pending) = challenge_channel(1);
        resolver.error(7, "Too many attempts");
        assert_eq!(
            pending.await,
            AuthOutcome::Error {
                code: 7,
                message: "Too many attempts".into()
            }
        );
    }

    #[test]
    fn test_cancel_runs_hook_and_closes_channel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        let (resolver, pending) = challenge_channel(3);
        let pending = pending.on_cancel(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        pending.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resolver.is_cancelled());
        assert!(!resolver.succeed());
    }

    #[test]
    fn test_drop_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        let (_resolver, pending) = challenge_channel(3);
        drop(pending.on_cancel(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolved_challenge_does_not_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        let (resolver, pending) = challenge_channel(4);
        let pending = pending.on_cancel(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        resolver.fail();
        assert_eq!(pending.await, AuthOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
