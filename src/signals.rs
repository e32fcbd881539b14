/// Termination source: resolves once on the first SIGTERM or SIGINT.
///
/// Payload-less by design: the multiplexer only needs to know that
/// termination was requested, not which signal asked for it.
#[cfg(unix)]
pub async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, listening for ctrl-c only");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = ctrl_c() => tracing::info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
pub async fn termination() {
    ctrl_c().await;
    tracing::info!("received ctrl-c");
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        // Without a working handler termination can never be requested.
        std::future::pending::<()>().await;
    }
}
