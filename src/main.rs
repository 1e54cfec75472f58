use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tollgate::config::RouterConfig;
use tollgate::persistence::{spawn_idle_sweep_task, spawn_persist_task};
use tollgate::{Router, logger};
use tracing::info;

fn start_scheduler_tick(scheduler: Arc<tollgate::scheduler::FairScheduler>, period: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => scheduler.tick(),
                _ = shutdown.changed() => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RouterConfig::from_env();
    logger::init_tracing(std::env::var("ROUTER_ENV").map(|v| v == "production").unwrap_or(false));

    let router = Arc::new(Router::new(config));
    router.restore().await;
    info!("router state restored, starting background tasks");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    start_scheduler_tick(router.scheduler.clone(), Duration::from_millis(router.config.fair_tick_ms), shutdown_rx.clone());

    if !router.config.disable_persist_thread {
        let snapshot_path = PathBuf::from(&router.config.snapshot_path);
        let router_for_persist = router.clone();
        spawn_persist_task(
            Duration::from_secs(router.config.persist_interval_s),
            snapshot_path,
            move || router_for_persist.snapshot(),
            shutdown_rx.clone(),
        );
    }

    let idle_tracker = router.idle_tracker.clone();
    let router_for_sweep = router.clone();
    spawn_idle_sweep_task(
        Duration::from_secs(router.config.idle_sweep_s),
        Duration::from_secs(router.config.idle_ttl_s),
        idle_tracker,
        move |session| {
            tracing::info!(session, "sweeping idle session");
            router_for_sweep.scheduler.evict(session);
            router_for_sweep.admission.evict_session(session);
        },
        shutdown_rx,
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, persisting final state");
    shutdown_tx.send(true).ok();
    // give the persist task a moment to write the final snapshot before exit
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
