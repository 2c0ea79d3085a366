use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first Ctrl+C or SIGTERM
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal, shutting down gracefully...");
            },
            _ = terminate => {
                info!("Received terminate signal, shutting down gracefully...");
            },
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_handler_does_not_cancel_on_its_own() {
        let token = CancellationToken::new();
        cancel_on_signal(token.clone());

        let waited = timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(waited.is_err(), "token should stay live without a signal");
        token.cancel();
    }

    #[tokio::test]
    async fn test_handler_exits_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        cancel_on_signal(token.clone());
        token.cancel();

        // Give the task a chance to observe the cancellation and finish
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(token.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_terminate_signal_setup() {
        let mut signal = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
        let result = timeout(Duration::from_millis(10), signal.recv()).await;
        assert!(result.is_err(), "Should timeout when no signal is sent");
    }
}
