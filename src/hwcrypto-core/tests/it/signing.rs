//! Biometric-gated signing: outcomes, cancellation, timeouts and
//! per-alias exclusion.

use std::sync::Arc;

use hwcrypto_core::HardwareCryptoError;
use hwcrypto_keystore::{EmulatedAuthenticator, PromptBehavior};

use crate::support::{hardware_crypto, verifies, wait_for_prompts};

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_held_prompt_then_approved() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();
    let public_key = crypto.export_public_key("k").unwrap();

    let task = {
        let crypto = crypto.clone();
        tokio::spawn(async move { crypto.sign("k", b"approve me").await })
    };

    wait_for_prompts(&auth, 1).await;
    assert!(auth.approve_next());

    let signature = task.await.unwrap().unwrap();
    assert!(verifies(&public_key, b"approve me", &signature));
}

#[tokio::test]
async fn test_authenticator_error_fails() {
    let auth = Arc::new(EmulatedAuthenticator::new(PromptBehavior::Reject {
        code: 7,
        message: "Too many attempts".into(),
    }));
    let crypto = hardware_crypto(auth, None);
    crypto.generate_key_pair("k").unwrap();

    match crypto.sign("k", b"x").await {
        Err(HardwareCryptoError::AuthenticationFailed { reason }) => {
            assert!(reason.contains("Too many attempts"));
            assert!(reason.contains('7'));
        },
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_without_reason() {
    let auth = Arc::new(EmulatedAuthenticator::new(PromptBehavior::Fail));
    let crypto = hardware_crypto(auth, None);
    crypto.generate_key_pair("k").unwrap();

    let err = crypto.sign("k", b"x").await.unwrap_err();
    assert!(matches!(err, HardwareCryptoError::AuthenticationFailed { .. }));
    assert!(err.is_authentication());
}

#[tokio::test]
async fn test_user_rejects_held_prompt() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();

    let (_handle, future) = crypto.sign_cancellable("k", b"x");
    let task = tokio::spawn(future);

    wait_for_prompts(&auth, 1).await;
    assert!(auth.reject_next(10, "User canceled"));

    assert!(matches!(
        task.await.unwrap(),
        Err(HardwareCryptoError::AuthenticationFailed { .. })
    ));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_handle_dismisses_prompt() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();

    let (handle, future) = crypto.sign_cancellable("k", b"x");
    let task = tokio::spawn(future);

    wait_for_prompts(&auth, 1).await;
    handle.cancel();

    assert!(matches!(
        task.await.unwrap(),
        Err(HardwareCryptoError::AuthenticationCancelled)
    ));
    assert_eq!(auth.pending(), 0);
    // A late callback has nothing to deliver to.
    assert!(!auth.approve_next());
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let crypto = hardware_crypto(Arc::new(EmulatedAuthenticator::approving()), None);
    crypto.generate_key_pair("k").unwrap();

    let (handle, future) = crypto.sign_cancellable("k", b"x");
    assert!(future.await.is_ok());
    handle.cancel();
    assert!(handle.is_cancelled());
}

#[tokio::test]
async fn test_dropping_future_dismisses_prompt() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();

    let task = {
        let crypto = crypto.clone();
        tokio::spawn(async move { crypto.sign("k", b"x").await })
    };
    wait_for_prompts(&auth, 1).await;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(auth.pending(), 0);

    // The alias is free again.
    crypto.generate_key_pair("k").unwrap();
}

#[tokio::test]
async fn test_timeout_cancels_pending_prompt() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), Some(1));
    crypto.generate_key_pair("k").unwrap();

    assert!(matches!(
        crypto.sign("k", b"x").await,
        Err(HardwareCryptoError::AuthenticationCancelled)
    ));
    assert_eq!(auth.pending(), 0);
}

// ============================================================================
// Per-alias exclusion
// ============================================================================

#[tokio::test]
async fn test_alias_busy_while_signing() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();
    crypto.generate_key_pair("other").unwrap();

    let (handle, future) = crypto.sign_cancellable("k", b"x");
    let task = tokio::spawn(future);
    wait_for_prompts(&auth, 1).await;

    assert!(matches!(
        crypto.delete_key_pair("k"),
        Err(HardwareCryptoError::AliasBusy { ref alias }) if alias == "k"
    ));
    assert!(matches!(
        crypto.sign("k", b"y").await,
        Err(HardwareCryptoError::AliasBusy { .. })
    ));
    // Reads and other aliases are unaffected.
    assert!(crypto.export_public_key("k").is_ok());
    assert!(crypto.delete_key_pair("other").unwrap());

    handle.cancel();
    assert!(task.await.unwrap().is_err());
    assert!(crypto.delete_key_pair("k").unwrap());
}

#[tokio::test]
async fn test_busy_alias_reported_by_cancellable_future() {
    let auth = Arc::new(EmulatedAuthenticator::holding());
    let crypto = hardware_crypto(Arc::clone(&auth), None);
    crypto.generate_key_pair("k").unwrap();

    let (first, pending) = crypto.sign_cancellable("k", b"x");
    let (_second, rejected) = crypto.sign_cancellable("k", b"x");

    assert!(matches!(
        rejected.await,
        Err(HardwareCryptoError::AliasBusy { .. })
    ));

    first.cancel();
    assert!(matches!(
        pending.await,
        Err(HardwareCryptoError::AuthenticationCancelled)
    ));
}
