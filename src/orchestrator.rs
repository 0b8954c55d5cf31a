// One pass over every enabled monitor: fetch, extract, filter, record.
use crate::analyzer::{KeywordFilter, RecordOutcome, qualify, record};
use crate::model::{
    LogAction, LogLevel, Monitor, MonitorError, Page, ParseError, Product, Stage, StorageError,
};
use crate::parser::adapter_for;
use crate::scraper::{Fetcher, PageResolver};
use crate::storage::SqliteStorage;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub pages: usize,
    pub items: usize,
    pub qualifying: usize,
    pub new_entries: usize,
    pub superseded: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub monitors: usize,
    pub failed: usize,
    pub new_entries: usize,
    pub superseded: usize,
    pub interrupted: bool,
}

pub struct MonitorRunner {
    storage: Arc<Mutex<SqliteStorage>>,
    fetcher: Arc<dyn Fetcher>,
    rendered: Option<Arc<dyn Fetcher>>,
    resolver: PageResolver,
    debug_html_dir: Option<PathBuf>,
}

impl MonitorRunner {
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        fetcher: Arc<dyn Fetcher>,
        rendered: Option<Arc<dyn Fetcher>>,
        resolver: PageResolver,
    ) -> Self {
        Self {
            storage,
            fetcher,
            rendered,
            resolver,
            debug_html_dir: None,
        }
    }

    /// Pages without a product region get saved here for inspection.
    pub fn with_debug_html_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_html_dir = dir;
        self
    }

    /// Runs every enabled monitor in turn. A failing monitor is logged and
    /// skipped; only store failures abort the pass.
    pub async fn run_all(&self, shutdown: &watch::Receiver<bool>) -> Result<RunSummary, StorageError> {
        let monitors = self.storage.lock().await.enabled_monitors()?;
        info!("Checking {} monitor(s)", monitors.len());

        let mut summary = RunSummary::default();
        for monitor in monitors {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping before monitor {}", monitor.id);
                summary.interrupted = true;
                break;
            }

            let product = self
                .storage
                .lock()
                .await
                .get_product(&monitor.product_id)?
                .ok_or_else(|| StorageError::NotFound(format!("product '{}'", monitor.product_id)))?;

            self.log(
                Some(monitor.id),
                LogAction::ScrapingStarted,
                LogLevel::Info,
                &format!("{} {}", monitor.supplier, monitor.url),
            )
            .await?;

            summary.monitors += 1;
            let finish = match self.run_monitor(&monitor, &product).await {
                Ok(stats) => {
                    summary.new_entries += stats.new_entries;
                    summary.superseded += stats.superseded;
                    format!(
                        "{} page(s), {} item(s), {} qualifying, {} new",
                        stats.pages,
                        stats.items,
                        stats.qualifying,
                        stats.new_entries + stats.superseded
                    )
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(monitor_id = e.monitor_id, stage = %e.stage, "{}", e);
                    self.log(Some(monitor.id), LogAction::Scraping, LogLevel::Error, &e.to_string())
                        .await?;
                    format!("failed during {}", e.stage)
                }
            };

            let storage = self.storage.lock().await;
            storage.append_log(Some(monitor.id), LogAction::ScrapingFinished, LogLevel::Info, &finish)?;
            storage.set_last_run(monitor.id, &Utc::now())?;
        }

        info!(
            "Run finished: {} monitor(s), {} failed, {} new, {} superseded",
            summary.monitors, summary.failed, summary.new_entries, summary.superseded
        );
        Ok(summary)
    }

    async fn run_monitor(&self, monitor: &Monitor, product: &Product) -> Result<MonitorStats, MonitorError> {
        let adapter = adapter_for(monitor.adapter).map_err(|e| MonitorError::new(monitor.id, Stage::ExtractItems, e))?;
        let fetcher = self.fetcher_for(adapter.needs_rendering(), monitor);

        let pages = self
            .resolver
            .resolve(fetcher.as_ref(), adapter.as_ref(), &monitor.url)
            .await
            .map_err(|e| MonitorError::new(monitor.id, Stage::ResolvePages, e))?;

        let extraction = adapter.extract_items(&pages);
        for problem in &extraction.problems {
            warn!(monitor_id = monitor.id, "{}", problem);
            self.log(Some(monitor.id), LogAction::Scraping, LogLevel::Warning, &problem.to_string())
                .await
                .map_err(|e| MonitorError::new(monitor.id, Stage::ExtractItems, e))?;
            self.save_debug_html(monitor, &pages, problem);
        }

        let mut stats = MonitorStats {
            pages: pages.len(),
            items: extraction.items.len(),
            ..Default::default()
        };
        let filter = KeywordFilter::new(&monitor.match_and, &monitor.match_or);

        for item in &extraction.items {
            if let Err(reason) = qualify(item, product, &filter) {
                debug!("Monitor {}: skipping {} (£{:.2}): {}", monitor.id, item.title, item.price, reason);
                continue;
            }
            stats.qualifying += 1;

            let outcome = {
                let storage = self.storage.lock().await;
                record(&storage, monitor, item, &Utc::now())
                    .map_err(|e| MonitorError::new(monitor.id, Stage::Record, e))?
            };
            match outcome {
                RecordOutcome::NoAction => {}
                RecordOutcome::NewEntry(id) => {
                    stats.new_entries += 1;
                    info!("New price £{:.2} for {} (entry {})", item.price, item.title, id);
                }
                RecordOutcome::Superseded { previous, entry } => {
                    stats.superseded += 1;
                    info!(
                        "Price now £{:.2} for {} (entry {} replaces {})",
                        item.price, item.title, entry, previous
                    );
                }
            }
        }

        Ok(stats)
    }

    fn fetcher_for(&self, needs_rendering: bool, monitor: &Monitor) -> Arc<dyn Fetcher> {
        if !needs_rendering {
            return self.fetcher.clone();
        }
        match &self.rendered {
            Some(rendered) => rendered.clone(),
            None => {
                warn!(
                    "Monitor {} ({}) needs rendering but no render service is configured",
                    monitor.id, monitor.adapter
                );
                self.fetcher.clone()
            }
        }
    }

    async fn log(
        &self,
        monitor_id: Option<i64>,
        action: LogAction,
        level: LogLevel,
        comment: &str,
    ) -> Result<(), StorageError> {
        self.storage.lock().await.append_log(monitor_id, action, level, comment)
    }

    fn save_debug_html(&self, monitor: &Monitor, pages: &[Page], problem: &ParseError) {
        let (Some(dir), ParseError::NoProductRegion(url)) = (&self.debug_html_dir, problem) else {
            return;
        };
        if let Some((n, page)) = pages.iter().enumerate().find(|(_, p)| p.url.as_str() == url) {
            save_html(dir, &format!("monitor-{}-page-{}.html", monitor.id, n + 1), &page.html);
        }
    }
}

/// Writes a page to the debug folder; failures are only logged.
fn save_html(folder: &Path, name: &str, html: &str) {
    if let Err(e) = fs::create_dir_all(folder) {
        warn!("Failed to create debug folder: {}", e);
        return;
    }
    let filename = folder.join(name);
    if let Err(e) = fs::write(&filename, html) {
        warn!("Failed to write debug HTML: {}", e);
    } else {
        info!("Saved debug HTML: {}", filename.display());
    }
}
