// Batches alert-eligible history entries into one message per run.
use crate::model::{AlertChannel, LogAction, LogLevel, PendingAlert, StorageError};
use crate::notifier::Notifier;
use crate::storage::SqliteStorage;
use crate::utils::pretty_date;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub entries: usize,
    pub delivered: Vec<AlertChannel>,
    pub failed: Vec<AlertChannel>,
}

pub struct AlertDispatcher {
    storage: Arc<Mutex<SqliteStorage>>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { storage, notifiers }
    }

    pub fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }

    /// Sends every eligible entry. Entries are flagged sent only when at least
    /// one channel delivered; otherwise they stay live for the next run.
    pub async fn dispatch(&self) -> Result<DispatchSummary, StorageError> {
        let pending = self.storage.lock().await.pending_alerts()?;
        if pending.is_empty() {
            return Ok(DispatchSummary::default());
        }
        if self.notifiers.is_empty() {
            warn!("{} alerts pending but no notification channel is configured", pending.len());
            return Ok(DispatchSummary {
                entries: pending.len(),
                ..Default::default()
            });
        }

        let now = Utc::now();
        let title = format!("Price Alerts {}", pretty_date(&now));
        let body = alert_body(&pending);

        let sends = self.notifiers.iter().map(|n| {
            let (title, body) = (&title, &body);
            async move { (n.channel(), n.send(title, body).await) }
        });
        let results = join_all(sends).await;

        let mut summary = DispatchSummary {
            entries: pending.len(),
            ..Default::default()
        };
        let storage = self.storage.lock().await;
        for (channel, result) in results {
            match result {
                Ok(()) => summary.delivered.push(channel),
                Err(e) => {
                    error!("Alert delivery via {} failed: {}", channel, e);
                    storage.append_log(
                        None,
                        LogAction::Notify,
                        LogLevel::Error,
                        &format!("{} failed: {}", channel, e),
                    )?;
                    summary.failed.push(channel);
                }
            }
        }

        if summary.delivered.is_empty() {
            warn!("No channel delivered; {} entries stay pending", pending.len());
            return Ok(summary);
        }

        record_delivery(&storage, &pending, &summary.delivered, &now)?;
        info!("Sent {} alerts via {:?}", pending.len(), summary.delivered);
        Ok(summary)
    }

    /// Archives sent alerts older than `age`.
    pub async fn archive_older_than(&self, age: Duration) -> Result<usize, StorageError> {
        let archived = self
            .storage
            .lock()
            .await
            .archive_alerts_before(&(Utc::now() - age))?;
        if archived > 0 {
            info!("Archived {} old alert(s)", archived);
        }
        Ok(archived)
    }
}

fn record_delivery(
    storage: &SqliteStorage,
    pending: &[PendingAlert],
    delivered: &[AlertChannel],
    sent_at: &DateTime<Utc>,
) -> Result<(), StorageError> {
    for alert in pending {
        for channel in delivered {
            storage.record_alert(&alert.entry, *channel, sent_at)?;
        }
        storage.append_log(
            Some(alert.entry.monitor_id),
            LogAction::Notify,
            LogLevel::Info,
            &format!("alerted {} at £{:.2}", alert.entry.product_title, alert.entry.price),
        )?;
    }
    let ids: Vec<i64> = pending.iter().map(|a| a.entry.id).collect();
    storage.mark_alert_sent(&ids)
}

/// One line per entry: "<date> <supplier> <title> £<price>" then the url.
pub fn alert_body(pending: &[PendingAlert]) -> String {
    pending
        .iter()
        .map(|a| {
            format!(
                "{} {} {} £{:.2}\n{}",
                pretty_date(&a.entry.date_when),
                a.supplier,
                a.entry.product_title,
                a.entry.price,
                a.entry.product_url
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
