//! Shutdown coordination for the collector
//!
//! One `CancellationToken` per scheduler run. The driver loop and every
//! cycle task hold a child token; provider calls and backoff sleeps race
//! against it, so cancellation interrupts a cycle at its next suspension
//! point.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Controller that also cancels on Ctrl+C
    pub fn with_ctrl_c() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping collection...");
                    token.cancel();
                }
                Err(e) => {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
            }
        });

        controller
    }

    /// Token cancelled together with this controller
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}

/// Run `future` unless `token` is cancelled first.
///
/// Returns `None` when cancelled.
pub async fn run_until_shutdown<F, T>(token: &CancellationToken, future: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = future => Some(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_cancels_children() {
        let controller = ShutdownController::new();
        let cycle = controller.child_token();
        let other = controller.child_token();

        cycle.cancel();
        assert!(!controller.is_cancelled());
        assert!(!other.is_cancelled());

        controller.shutdown();
        assert!(other.is_cancelled());
        controller.wait_for_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let token = CancellationToken::new();
        assert_eq!(run_until_shutdown(&token, async { 7 }).await, Some(7));

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = run_until_shutdown(&token, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            7
        })
        .await;
        assert_eq!(result, None);
    }
}
