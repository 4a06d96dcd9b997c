mod wiring;

use creative_analysis::telemetry;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = creative_analysis::load_from_env()?;
    telemetry::init_tracing(config.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = %config.project_id,
        subscription = %config.subscription,
        dataset = %config.dataset,
        bucket = %config.bucket,
        vector_index = %config.vector_index,
        "Starting analysis worker"
    );

    let intake = wiring::build_intake(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, draining in-flight jobs");
        let _ = shutdown_tx.send(true);
    });

    let stats = intake.run(shutdown_rx).await;
    info!(
        received = stats.received,
        completed = stats.completed,
        failed = stats.failed,
        "Analysis worker stopped"
    );

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
