/*
 * Interruption handling.
 *
 * SIGINT/SIGTERM flip a shared flag that scan and write tasks check
 * between requests. An interrupted copy stops at the next page boundary
 * and the job ends as a failure; there is no checkpoint.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared interruption flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    triggered: Arc<AtomicBool>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every task to stop.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::warn!("Interrupt requested, stopping the copy");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Waits for SIGINT or SIGTERM and triggers `signal`.
pub async fn wait_for_signal(signal: InterruptSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match (
            unix_signal(SignalKind::terminate()),
            unix_signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT");
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to install signal handlers ({}), using Ctrl+C only", e);
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::info!("Received Ctrl+C");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C");
    }

    signal.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_shared() {
        let signal = InterruptSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());

        signal.trigger();
        signal.trigger();
        assert!(clone.is_triggered());
    }
}
