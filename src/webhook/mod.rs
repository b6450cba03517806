pub mod server;

pub use server::{build_router, ServerLimits, WebhookState};

/// Bind `addr` and serve the webhook routes until Ctrl-C.
pub async fn serve(addr: &str, state: WebhookState, limits: ServerLimits) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    tracing::info!("webhook listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(state, limits))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
