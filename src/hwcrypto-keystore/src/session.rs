//! Signing sessions.
//!
//! A session is a SHA256-with-ECDSA context bound to one key. It is opened
//! before the user-presence challenge and finished only with the
//! [`Authorization`] that challenge produced.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::challenge::Authorization;
use crate::error::KeystoreError;
use crate::types::KeyHandle;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique session id.
#[must_use]
pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A bound, not yet consumed, signature context.
pub trait SigningSession: Send {
    /// Process-unique id, used to bind the authorization.
    fn session_id(&self) -> u64;

    /// Key the context is bound to.
    fn handle(&self) -> &KeyHandle;

    /// Sign `payload` (hashed with SHA-256 inside) and consume the session.
    ///
    /// Returns a DER-encoded ECDSA signature.
    fn finish(
        self: Box<Self>,
        authorization: &Authorization,
        payload: &[u8],
    ) -> Result<Vec<u8>, KeystoreError>;

    /// Downcast support for platform authenticators that need the native
    /// context object.
    fn as_any(&self) -> &dyn Any;
}

/// Reject an authorization minted for a different session.
pub fn check_authorization(
    session_id: u64,
    authorization: &Authorization,
) -> Result<(), KeystoreError> {
    if authorization.session_id() != session_id {
        return Err(KeystoreError::signing(format!(
            "authorization for session {} presented to session {session_id}",
            authorization.session_id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{challenge_channel, AuthOutcome};

    #[test]
    fn test_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_foreign_authorization_rejected() {
        let (resolver, pending) = challenge_channel(100);
        resolver.succeed();
        let AuthOutcome::Succeeded(auth) = pending.await else {
            panic!("expected success");
        };

        assert!(check_authorization(100, &auth).is_ok());
        assert!(matches!(
            check_authorization(101, &auth),
            Err(KeystoreError::SigningFailed { .. })
        ));
    }
}
