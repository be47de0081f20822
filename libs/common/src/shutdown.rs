//! Shutdown signal handling
//!
//! The proxy stops both servers through one [`CancellationToken`]. This
//! module turns Ctrl+C and SIGTERM into a cancellation of that token.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What ended [`cancel_on_signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl+C / SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// The token was cancelled by someone else first
    Cancelled,
}

/// Cancel `cancel` when the process receives Ctrl+C or SIGTERM.
///
/// Returns early, without logging, if the token is cancelled elsewhere
/// (a server failed, or a test stopped the service).
pub async fn cancel_on_signal(cancel: CancellationToken) -> ShutdownTrigger {
    let trigger = tokio::select! {
        _ = cancel.cancelled() => return ShutdownTrigger::Cancelled,
        trigger = wait_for_signal() => trigger,
    };

    info!("Received {:?} signal, stopping servers", trigger);
    cancel.cancel();
    trigger
}

async fn wait_for_signal() -> ShutdownTrigger {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Proxy will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = interrupt() => ShutdownTrigger::Interrupt,
            _ = async {
                match term_signal.as_mut() {
                    Some(sig) => {
                        sig.recv().await;
                    },
                    None => std::future::pending::<()>().await,
                }
            } => ShutdownTrigger::Terminate,
        }
    }
    #[cfg(not(unix))]
    {
        interrupt().await;
        ShutdownTrigger::Interrupt
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
