use crate::api::limit::IdleClientSweep;
use crate::api::{AppState, app_router};
use crate::core::cache::RateCache;
use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::service::ConversionService;
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct App {
    pub router: Router,
    pub state: Arc<AppState>,
    pub idle_clients: IdleClientSweep,
}

/// Assembles the service and router from configuration.
pub fn build_app(config: &AppConfig) -> Result<App> {
    let service = ConversionService::from_config(config, Arc::new(SystemClock))
        .context("Failed to build conversion service")?;
    let state = Arc::new(AppState::new(Arc::new(service)));
    let (router, idle_clients) =
        app_router(state.clone(), &config.server).context("Failed to build router")?;
    Ok(App {
        router,
        state,
        idle_clients,
    })
}

/// Periodically evicts expired cache entries and idle rate-limit clients
/// until `shutdown` flips.
pub async fn sweep_loop(
    cache: RateCache,
    idle_clients: IdleClientSweep,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = cache.sweep().await;
                let idle = idle_clients();
                if evicted > 0 {
                    let remaining = cache.len().await;
                    info!(evicted, remaining, "Swept expired cache entries");
                }
                debug!(idle, "Pruned idle rate-limit clients");
            }
            _ = shutdown.changed() => {
                debug!("Cache sweep stopping");
                return;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

pub async fn serve(config: AppConfig) -> Result<()> {
    let App {
        router,
        state,
        idle_clients,
    } = build_app(&config)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep_loop(
        state.service.cache().clone(),
        idle_clients,
        Duration::from_secs(config.cache.sweep_interval_secs),
        stop_rx,
    ));

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    info!(
        addr = %config.server.listen_addr,
        strategies = ?state.service.strategy_names(),
        "divisa listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    let _ = stop_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Cache sweep task ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::rate::{Currency, RatePair, RateQuote, RateSource};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_evicts_and_stops() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = RateCache::new(chrono::Duration::seconds(10), clock.clone());
        cache
            .put(RateQuote::new(
                Currency::Usd,
                RatePair::new(dec!(17.80), dec!(19.30)),
                clock.now(),
                RateSource::Scraped,
                "test",
            ))
            .await;
        let swept = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = swept.clone();
        let idle_clients: IdleClientSweep = Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            0usize
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(sweep_loop(
            cache.clone(),
            idle_clients,
            Duration::from_secs(5),
            stop_rx,
        ));

        clock.advance(chrono::Duration::seconds(11));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty().await);
        assert_eq!(swept.load(std::sync::atomic::Ordering::SeqCst), 1);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_sweep_loop_future_is_send() {
        fn assert_send<T: Send>(_: T) {}
        let cache = RateCache::new(chrono::Duration::seconds(10), Arc::new(SystemClock));
        let (_stop_tx, stop_rx) = watch::channel(false);
        assert_send(sweep_loop(
            cache,
            Arc::new(|| 0usize),
            Duration::from_secs(1),
            stop_rx,
        ));
    }

    #[test]
    fn test_build_app_from_defaults() {
        let app = build_app(&AppConfig::default()).unwrap();
        assert_eq!(
            app.state.service.strategy_names(),
            vec!["page_scrape", "endpoint_probe"]
        );
    }
}
