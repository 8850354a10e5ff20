use anyhow::{Context, Result};
use nudge::daemon::{termination_signal, Daemon};
use nudge::notify::DesktopNotifier;
use nudge::{logging, Settings, SystemClock};
use tokio::sync::watch;

fn main() -> Result<()> {
    logging::init_stderr("info");
    let settings = Settings::load();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    let notifier = DesktopNotifier::new(&settings.daemon.notify);
    let daemon = Daemon::new(
        settings.queue_path(),
        notifier,
        SystemClock,
        settings.daemon.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        if let Err(err) = termination_signal().await {
            tracing::warn!("signal handlers unavailable: {err}");
            // keep the sender alive so the loop is not stopped by its drop
            std::future::pending::<()>().await;
        }
        let _ = stop_tx.send(true);
    });

    daemon.run(stop_rx).await;
    signals.abort();
    Ok(())
}
