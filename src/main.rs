mod analyzer;
mod config;
mod model;
mod normalizer;
mod notifier;
mod orchestrator;
mod parser;
mod scraper;
mod storage;
mod utils;

use config::{AppConfig, load_config};
use model::{Product, StorageError};
use notifier::{AlertDispatcher, Notifier, broadcast, build_notifiers};
use orchestrator::{MonitorRunner, RunSummary};
use scraper::{ChallengeGuard, Fetcher, HttpFetcher, PageResolver, RenderFetcher};
use std::path::PathBuf;
use storage::SqliteStorage;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::{Duration, Instant, sleep};
use tracing::{error, info, warn};
use utils::{Backoff, with_extra_jitter};

/// Wait before refetching a page that answered with a human-verification check.
const CHALLENGE_RETRY_WAIT: Duration = Duration::from_secs(5);
/// Extra random wait added to each escalating retry.
const RETRY_JITTER: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config: Arc<AppConfig> = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Config load error ({}): {}", config_path, e);
            return;
        }
    };

    let storage = match SqliteStorage::new(&config.database_path) {
        Ok(s) => Arc::new(Mutex::new(s)),
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            return;
        }
    };
    if let Err(e) = sync_catalog(&*storage.lock().await, &config) {
        error!("Failed to store products and monitors: {}", e);
        return;
    }

    let runner = match build_runner(storage.clone(), &config) {
        Ok(runner) => runner,
        Err(e) => {
            error!("Failed to set up fetchers: {}", e);
            return;
        }
    };
    let notifiers = match build_notifiers(&config.notifiers) {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to set up notifiers: {}", e);
            return;
        }
    };
    if notifiers.is_empty() {
        warn!("No notification channel configured; alerts will stay pending");
    }
    let dispatcher = AlertDispatcher::new(storage.clone(), notifiers);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing current monitor...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
        // Keep the sender alive so receivers never see a closed channel.
        shutdown_tx.closed().await;
    });

    info!("Sending startup message...");
    broadcast(dispatcher.notifiers(), "Price tracker", "Starting price tracker!").await;

    run_forever(&config, &runner, &dispatcher, shutdown_rx).await;
    info!("Price tracker stopped.");
}

/// Mirrors configured products and monitors into the database.
fn sync_catalog(storage: &SqliteStorage, config: &AppConfig) -> Result<(), StorageError> {
    for p in &config.products {
        storage.upsert_product(&Product {
            id: p.id.clone(),
            price_alert_threshold: p.price_alert_threshold,
            product_type: p.product_type.clone(),
        })?;
    }
    for m in &config.monitors {
        let id = storage.upsert_monitor(m)?;
        info!("Monitor {}: {} {} ({})", id, m.supplier_name(), m.url, m.product_id);
    }
    Ok(())
}

fn build_runner(storage: Arc<Mutex<SqliteStorage>>, config: &AppConfig) -> Result<MonitorRunner, model::FetchError> {
    let http = HttpFetcher::new(config.fetch_timeout())?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(ChallengeGuard::new(http, CHALLENGE_RETRY_WAIT));

    let rendered: Option<Arc<dyn Fetcher>> = match &config.render_service_url {
        Some(endpoint) => {
            let render = RenderFetcher::new(endpoint, config.fetch_timeout())?;
            Some(Arc::new(ChallengeGuard::new(render, CHALLENGE_RETRY_WAIT)))
        }
        None => None,
    };

    let resolver = PageResolver::new(config.page_delay(), config.scrape_delay_random_factor);
    Ok(MonitorRunner::new(storage, fetcher, rendered, resolver)
        .with_debug_html_dir(config.debug_html_dir.as_ref().map(PathBuf::from)))
}

async fn run_once(
    config: &AppConfig,
    runner: &MonitorRunner,
    dispatcher: &AlertDispatcher,
    shutdown: &watch::Receiver<bool>,
) -> Result<RunSummary, StorageError> {
    let summary = runner.run_all(shutdown).await?;
    dispatcher.dispatch().await?;
    let archive_after = i64::try_from(config.alert_archive_days)
        .ok()
        .and_then(chrono::Duration::try_days);
    if let Some(age) = archive_after.filter(|age| !age.is_zero()) {
        dispatcher.archive_older_than(age).await?;
    }
    Ok(summary)
}

/// Check, dispatch, sleep; forever, until Ctrl-C.
async fn run_forever(
    config: &AppConfig,
    runner: &MonitorRunner,
    dispatcher: &AlertDispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    let notifiers: &[Arc<dyn Notifier>] = dispatcher.notifiers();
    let check_interval = Duration::from_secs(config.check_interval_seconds);
    let check_jitter = Duration::from_secs(config.check_interval_jitter_seconds);
    let heartbeat = config.heartbeat();
    let mut backoff = Backoff::new(Duration::from_secs(config.retry_increment_seconds), RETRY_JITTER);
    let mut last_heartbeat = Instant::now();

    loop {
        let started = Instant::now();
        if !heartbeat.is_zero() && started.duration_since(last_heartbeat) > heartbeat {
            broadcast(notifiers, "Price tracker", "I am still alive!").await;
            last_heartbeat = started;
        }

        info!("Starting price check...");
        let outcome = run_once(config, runner, dispatcher, &shutdown).await;

        let wait = match outcome {
            Ok(summary) => {
                if summary.interrupted {
                    break;
                }
                if backoff.on_success() {
                    broadcast(notifiers, "Price tracker", "Price tracker is connected again!").await;
                }
                let next = with_extra_jitter(check_interval, check_jitter);
                let wait = next.saturating_sub(started.elapsed());
                info!("Prices updated! {} seconds until next check", wait.as_secs());
                wait
            }
            Err(e) => {
                let wait = backoff.on_failure();
                error!("Price check failed ({} in a row): {}", backoff.failures(), e);
                broadcast(
                    notifiers,
                    "Price tracker",
                    &format!(
                        "Price tracker has disconnected, retrying in {} seconds!",
                        wait.as_secs()
                    ),
                )
                .await;
                wait
            }
        };

        tokio::select! {
            _ = sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
