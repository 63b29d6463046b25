use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled on SIGTERM or SIGINT.
///
/// Cancellation stops job intake; jobs already leased to the worker pool run
/// to completion before the node exits.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let received = wait_for_signal().await;
        tracing::info!(signal = received, "Shutdown requested, draining worker pool");
        trigger.cancel();
    });

    token
}

async fn wait_for_signal() -> &'static str {
    let handlers = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    );
    let (mut sigterm, mut sigint) = match handlers {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Unix signal handlers unavailable, falling back to ctrl-c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            return "ctrl-c";
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
