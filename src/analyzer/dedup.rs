// Price dedup and alert eligibility.
//
// Each (monitor, product url) key has at most one live entry. A price change
// flags the old entries as sent and opens a new live one, so every distinct
// price can alert at most once.
use crate::analyzer::matcher::KeywordFilter;
use crate::model::{HistoryEntry, Monitor, Product, RawItem, StorageError};
use crate::parser::price::same_price;
use crate::storage::SqliteStorage;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::debug;

/// Why an item was not considered for recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoPrice,
    NoThreshold,
    AboveThreshold,
    KeywordMismatch,
    OutOfStock,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::NoPrice => "no price",
            Rejection::NoThreshold => "product has no threshold",
            Rejection::AboveThreshold => "above threshold",
            Rejection::KeywordMismatch => "keywords do not match",
            Rejection::OutOfStock => "out of stock",
        };
        f.write_str(reason)
    }
}

pub fn qualify(item: &RawItem, product: &Product, filter: &KeywordFilter) -> Result<(), Rejection> {
    if !(item.price > 0.0) {
        return Err(Rejection::NoPrice);
    }
    let threshold = product.price_alert_threshold.ok_or(Rejection::NoThreshold)?;
    if item.price > threshold {
        return Err(Rejection::AboveThreshold);
    }
    if !filter.matches(&item.text) {
        return Err(Rejection::KeywordMismatch);
    }
    if !item.in_stock {
        return Err(Rejection::OutOfStock);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Insert,
    Supersede { previous: i64, old_price: f64 },
    Unchanged,
}

/// Compares against the most recent entry for the key only.
pub fn decide(latest: Option<&HistoryEntry>, price: f64) -> Decision {
    match latest {
        None => Decision::Insert,
        Some(prev) if same_price(prev.price, price) => Decision::Unchanged,
        Some(prev) => Decision::Supersede {
            previous: prev.id,
            old_price: prev.price,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    NoAction,
    NewEntry(i64),
    Superseded { previous: i64, entry: i64 },
}

/// Records a qualifying item. Lookup, flagging and insert share one transaction.
pub fn record(
    storage: &SqliteStorage,
    monitor: &Monitor,
    item: &RawItem,
    now: &DateTime<Utc>,
) -> Result<RecordOutcome, StorageError> {
    let tx = storage.begin_history()?;
    let latest = tx.latest(monitor.id, &item.url)?;

    let outcome = match decide(latest.as_ref(), item.price) {
        Decision::Unchanged => RecordOutcome::NoAction,
        Decision::Insert => {
            let id = tx.insert_live(monitor.id, &item.url, &item.title, item.price, now)?;
            RecordOutcome::NewEntry(id)
        }
        Decision::Supersede { previous, old_price } => {
            tx.flag_stale(monitor.id, &item.url)?;
            let id = tx.insert_live(monitor.id, &item.url, &item.title, item.price, now)?;
            debug!(
                "Monitor {}: {} moved £{:.2} -> £{:.2}",
                monitor.id, item.url, old_price, item.price
            );
            RecordOutcome::Superseded { previous, entry: id }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::model::{AdapterKind, AlertChannel};
    use chrono::Duration;

    const ITEM_URL: &str = "https://www.scan.co.uk/products/sapphire-pulse-rx-9070-xt";

    fn setup(alerts_enabled: bool) -> (SqliteStorage, Monitor) {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage
            .upsert_product(&Product {
                id: "9070xt".into(),
                price_alert_threshold: Some(600.0),
                product_type: "gpu".into(),
            })
            .unwrap();
        let id = storage
            .upsert_monitor(&MonitorConfig {
                product_id: "9070xt".into(),
                adapter: AdapterKind::Scan,
                supplier: None,
                url: "https://www.scan.co.uk/shop/gpus".into(),
                match_and: vec![],
                match_or: vec![],
                enabled: true,
                alerts_enabled,
            })
            .unwrap();
        let monitor = storage.get_monitor(id).unwrap().unwrap();
        (storage, monitor)
    }

    fn item(price: f64) -> RawItem {
        RawItem {
            price,
            url: ITEM_URL.into(),
            title: "Sapphire Pulse RX 9070 XT".into(),
            in_stock: true,
            text: "sapphire pulse rx 9070xt in stock".into(),
        }
    }

    fn product(threshold: Option<f64>) -> Product {
        Product {
            id: "9070xt".into(),
            price_alert_threshold: threshold,
            product_type: "gpu".into(),
        }
    }

    #[test]
    fn qualification_rules() {
        let filter = KeywordFilter::new(&["9070xt".to_string()], &[]);
        let p = product(Some(600.0));

        assert_eq!(qualify(&item(550.0), &p, &filter), Ok(()));
        assert_eq!(qualify(&item(600.0), &p, &filter), Ok(()));
        assert_eq!(qualify(&item(650.0), &p, &filter), Err(Rejection::AboveThreshold));
        assert_eq!(qualify(&item(0.0), &p, &filter), Err(Rejection::NoPrice));
        assert_eq!(
            qualify(&item(550.0), &product(None), &filter),
            Err(Rejection::NoThreshold)
        );

        let mut gone = item(550.0);
        gone.in_stock = false;
        assert_eq!(qualify(&gone, &p, &filter), Err(Rejection::OutOfStock));

        let other = KeywordFilter::new(&["5090".to_string()], &[]);
        assert_eq!(qualify(&item(550.0), &p, &other), Err(Rejection::KeywordMismatch));
    }

    #[test]
    fn decide_compares_in_pence() {
        let prev = HistoryEntry {
            id: 1,
            monitor_id: 1,
            date_when: Utc::now(),
            product_title: "t".into(),
            product_url: ITEM_URL.into(),
            price: 549.99,
            alert_sent: false,
        };
        assert_eq!(decide(None, 549.99), Decision::Insert);
        assert_eq!(decide(Some(&prev), 549.990000001), Decision::Unchanged);
        assert_eq!(
            decide(Some(&prev), 549.98),
            Decision::Supersede {
                previous: 1,
                old_price: 549.99
            }
        );
    }

    #[test]
    fn price_sequence_keeps_one_live_entry() {
        let (storage, monitor) = setup(true);
        let start = Utc::now();

        let outcomes: Vec<RecordOutcome> = [100.0, 100.0, 90.0, 90.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, price)| {
                record(&storage, &monitor, &item(*price), &(start + Duration::minutes(i as i64))).unwrap()
            })
            .collect();

        assert!(matches!(outcomes[0], RecordOutcome::NewEntry(_)));
        assert_eq!(outcomes[1], RecordOutcome::NoAction);
        assert!(matches!(outcomes[2], RecordOutcome::Superseded { .. }));
        assert_eq!(outcomes[3], RecordOutcome::NoAction);
        assert!(matches!(outcomes[4], RecordOutcome::Superseded { .. }));

        let history = storage.history_for(monitor.id, ITEM_URL).unwrap();
        let prices: Vec<f64> = history.iter().map(|h| h.price).collect();
        assert_eq!(prices, vec![100.0, 90.0, 100.0]);
        assert_eq!(
            history.iter().map(|h| h.alert_sent).collect::<Vec<_>>(),
            vec![true, true, false]
        );
    }

    #[test]
    fn sent_entries_are_never_eligible() {
        let (storage, monitor) = setup(true);
        let now = Utc::now();
        let RecordOutcome::NewEntry(id) = record(&storage, &monitor, &item(500.0), &now).unwrap() else {
            panic!("expected a new entry");
        };

        let pending = storage.pending_alerts().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entry.id, id);
        assert_eq!(pending[0].supplier, "Scan");

        storage.mark_alert_sent(&[id]).unwrap();
        assert!(storage.pending_alerts().unwrap().is_empty());

        // Same price seen again compares against the sent entry and stays quiet.
        let again = record(&storage, &monitor, &item(500.0), &(now + Duration::minutes(1))).unwrap();
        assert_eq!(again, RecordOutcome::NoAction);
        assert!(storage.pending_alerts().unwrap().is_empty());
    }

    #[test]
    fn already_alerted_triple_is_not_eligible() {
        let (storage, monitor) = setup(true);
        let now = Utc::now();

        record(&storage, &monitor, &item(500.0), &now).unwrap();
        let first = storage.pending_alerts().unwrap().remove(0).entry;
        storage.record_alert(&first, AlertChannel::Telegram, &now).unwrap();

        // 500 -> 520 -> 500: the last entry repeats an alerted (monitor, price, title).
        record(&storage, &monitor, &item(520.0), &(now + Duration::minutes(1))).unwrap();
        record(&storage, &monitor, &item(500.0), &(now + Duration::minutes(2))).unwrap();

        let history = storage.history_for(monitor.id, ITEM_URL).unwrap();
        assert_eq!(history.len(), 3);
        assert!(!history[2].alert_sent);
        assert!(storage.pending_alerts().unwrap().is_empty());
    }

    #[test]
    fn monitors_with_alerts_off_record_but_never_alert() {
        let (storage, monitor) = setup(false);
        record(&storage, &monitor, &item(500.0), &Utc::now()).unwrap();

        assert_eq!(storage.history_for(monitor.id, ITEM_URL).unwrap().len(), 1);
        assert!(storage.pending_alerts().unwrap().is_empty());
    }
}
