//! Signals emitted to the presentation layer.
//!
//! The coordinator reports outcomes through an MPSC channel rather than by
//! touching UI state. Hosts own the receiving end and map each signal onto
//! their own state (modals, error lists, user display).

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

use crate::auth::UserAttributes;

/// Buffer size for signal channels created by `channel()`.
/// Each flow emits one or two signals; a host that stops reading loses
/// signals once the buffer is full, it never stalls a flow.
pub const SIGNAL_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum AuthSignal {
    /// Sign-in completed; carries the user's attributes
    SignInSucceeded(UserAttributes),
    /// Sign-in rejected; carries the API's error strings verbatim
    SignInFailed(Vec<String>),
    /// Stored credentials were removed (sign-out, invalidation)
    CredentialsCleared,
    SignUpSucceeded(UserAttributes),
    SignUpFailed(Vec<String>),
    /// Reset email requested; carries the API's confirmation message
    PasswordResetRequested(Option<String>),
    PasswordResetFailed(Vec<String>),
    PasswordUpdated(UserAttributes),
    PasswordUpdateFailed(Vec<String>),
    /// Sign-out request rejected. Credentials are cleared regardless.
    SignOutFailed(Vec<String>),
}

/// Create a signal channel with the default buffer size.
pub fn channel() -> (mpsc::Sender<AuthSignal>, mpsc::Receiver<AuthSignal>) {
    mpsc::channel(SIGNAL_BUFFER_SIZE)
}

/// Optional signal sender. Emitting without a listener is a no-op.
#[derive(Debug, Clone, Default)]
pub(crate) struct SignalSink {
    tx: Option<mpsc::Sender<AuthSignal>>,
}

impl SignalSink {
    pub(crate) fn new(tx: mpsc::Sender<AuthSignal>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Send a signal without waiting. A full or closed channel drops it.
    pub(crate) fn emit(&self, signal: AuthSignal) {
        let Some(ref tx) = self.tx else {
            return;
        };
        match tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                warn!(?signal, "Signal channel full, dropping auth signal");
            }
            Err(TrySendError::Closed(_)) => {
                error!("Failed to emit auth signal - channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let (tx, mut rx) = channel();
        let sink = SignalSink::new(tx);
        sink.emit(AuthSignal::SignInFailed(vec!["nope".into()]));
        sink.emit(AuthSignal::CredentialsCleared);

        assert_eq!(rx.recv().await, Some(AuthSignal::SignInFailed(vec!["nope".into()])));
        assert_eq!(rx.recv().await, Some(AuthSignal::CredentialsCleared));
    }

    #[test]
    fn test_emit_without_listener_is_noop() {
        SignalSink::default().emit(AuthSignal::CredentialsCleared);

        let (tx, rx) = channel();
        drop(rx);
        SignalSink::new(tx).emit(AuthSignal::CredentialsCleared);
    }

    #[tokio::test]
    async fn test_emit_never_blocks_on_unread_channel() {
        let (tx, mut rx) = channel();
        let sink = SignalSink::new(tx);
        for _ in 0..SIGNAL_BUFFER_SIZE + 4 {
            sink.emit(AuthSignal::CredentialsCleared);
        }

        // The buffered signals are kept, the overflow is dropped
        for _ in 0..SIGNAL_BUFFER_SIZE {
            assert_eq!(rx.recv().await, Some(AuthSignal::CredentialsCleared));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_signal_serialization_shape() {
        let value = serde_json::to_value(AuthSignal::SignInFailed(vec!["bad".into()])).unwrap();
        assert_eq!(value, json!({"type": "signInFailed", "payload": ["bad"]}));

        let value = serde_json::to_value(AuthSignal::CredentialsCleared).unwrap();
        assert_eq!(value, json!({"type": "credentialsCleared"}));
    }
}
