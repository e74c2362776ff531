use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{RagError, Result};

/// Cooperative cancellation signal shared by ingest and retrieve calls.
///
/// Clones observe the same signal. Once cancelled, it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives as long as `self`, so this only errs after a cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancelled first; in-flight work is dropped on cancel.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(RagError::Cancelled),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_interrupts_pending_future() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });
        let out = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await;
        assert_eq!(out, Err(RagError::Cancelled));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn uncancelled_future_completes() {
        let token = CancellationToken::new();
        assert_eq!(token.run(async { Ok(7) }).await, Ok(7));
    }
}
