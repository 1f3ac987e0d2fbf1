//! Composite cancellation handle binding service stop, peer-initiated
//! cancellation, and per-session cancellation into one small state machine.
//!
//! Built on `tokio_util::sync::CancellationToken`, following the token-tree
//! idiom of a "service token, per-connection child token" shape.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Handle shared by every long-running task in a process. `child()` derives
/// a token that is cancelled whenever the root is, but can also be
/// cancelled independently (e.g. one session ending does not affect others).
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A token cancelled whenever this one is, independently cancellable.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Install SIGTERM/SIGINT (Unix) or Ctrl-C (Windows) handlers that
    /// cancel this handle exactly once.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            shutdown.cancel();
        });

        #[cfg(windows)]
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.expect("failed to register Ctrl+C handler");
            tracing::info!("received Ctrl+C, shutting down");
            shutdown.cancel();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_is_cancelled_with_parent() {
        let root = ShutdownHandle::new();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancellation_does_not_affect_parent() {
        let root = ShutdownHandle::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
