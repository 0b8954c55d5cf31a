use crate::config::MonitorConfig;
use crate::model::{
    AdapterKind, AlertChannel, HistoryEntry, LogAction, LogLevel, Monitor, PendingAlert, Product,
    StorageError,
};
use crate::utils::{format_datetime, parse_datetime};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS product (
        productid TEXT PRIMARY KEY,
        price_alert_threshold REAL CHECK (price_alert_threshold IS NULL OR price_alert_threshold > 0),
        product_type TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS monitor (
        monitorid INTEGER PRIMARY KEY AUTOINCREMENT,
        productid TEXT NOT NULL REFERENCES product(productid),
        supplier TEXT NOT NULL,
        parser TEXT NOT NULL,
        url TEXT NOT NULL,
        last_run TEXT,
        match_and TEXT NOT NULL DEFAULT '[]',
        match_or TEXT NOT NULL DEFAULT '[]',
        disable_alerts INTEGER NOT NULL DEFAULT 0,
        disable INTEGER NOT NULL DEFAULT 0,
        UNIQUE (productid, parser, url)
    );

    CREATE TABLE IF NOT EXISTS monitor_history (
        monitor_historyid INTEGER PRIMARY KEY AUTOINCREMENT,
        monitorid INTEGER NOT NULL REFERENCES monitor(monitorid),
        date_when TEXT NOT NULL,
        product_title TEXT NOT NULL DEFAULT '',
        product_url TEXT NOT NULL DEFAULT '',
        price REAL NOT NULL,
        alert_sent INTEGER NOT NULL DEFAULT 0
    );

    -- at most one live (unsent) entry per monitor and product url
    CREATE UNIQUE INDEX IF NOT EXISTS ux_monitor_history_live
        ON monitor_history (monitorid, product_url) WHERE alert_sent = 0;

    CREATE INDEX IF NOT EXISTS ix_monitor_history_key
        ON monitor_history (monitorid, product_url, date_when);

    CREATE TABLE IF NOT EXISTS alert (
        alertid INTEGER PRIMARY KEY AUTOINCREMENT,
        monitor_historyid INTEGER NOT NULL REFERENCES monitor_history(monitor_historyid),
        monitorid INTEGER NOT NULL REFERENCES monitor(monitorid),
        carrier TEXT NOT NULL,
        date_sent TEXT NOT NULL,
        archived INTEGER NOT NULL DEFAULT 0,
        product_title TEXT NOT NULL,
        price REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS log (
        logid INTEGER PRIMARY KEY AUTOINCREMENT,
        monitorid INTEGER REFERENCES monitor(monitorid),
        action TEXT NOT NULL,
        \"when\" TEXT NOT NULL,
        comment TEXT NOT NULL,
        level TEXT NOT NULL
    );
";

const HISTORY_COLUMNS: &str =
    "monitor_historyid, monitorid, date_when, product_title, product_url, price, alert_sent";

const MONITOR_COLUMNS: &str =
    "monitorid, productid, supplier, parser, url, match_and, match_or, disable, disable_alerts, last_run";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens the database (":memory:" works too) and creates missing tables.
    pub fn new(db_path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn upsert_product(&self, product: &Product) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO product (productid, price_alert_threshold, product_type)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(productid) DO UPDATE SET
                price_alert_threshold = excluded.price_alert_threshold,
                product_type = excluded.product_type",
            params![&product.id, &product.price_alert_threshold, &product.product_type],
        )?;
        Ok(())
    }

    pub fn get_product(&self, product_id: &str) -> Result<Option<Product>, StorageError> {
        let product = self
            .conn
            .query_row(
                "SELECT productid, price_alert_threshold, product_type FROM product WHERE productid = ?1",
                params![product_id],
                |row| {
                    Ok(Product {
                        id: row.get(0)?,
                        price_alert_threshold: row.get(1)?,
                        product_type: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    /// Creates or refreshes a monitor keyed on (product, adapter, url) and returns its id.
    pub fn upsert_monitor(&self, cfg: &MonitorConfig) -> Result<i64, StorageError> {
        let match_and = serde_json::to_string(&cfg.match_and)?;
        let match_or = serde_json::to_string(&cfg.match_or)?;
        self.conn.execute(
            "INSERT INTO monitor (productid, supplier, parser, url, match_and, match_or, disable_alerts, disable)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(productid, parser, url) DO UPDATE SET
                supplier = excluded.supplier,
                match_and = excluded.match_and,
                match_or = excluded.match_or,
                disable_alerts = excluded.disable_alerts,
                disable = excluded.disable",
            params![
                &cfg.product_id,
                &cfg.supplier_name(),
                cfg.adapter.as_str(),
                &cfg.url,
                &match_and,
                &match_or,
                !cfg.alerts_enabled,
                !cfg.enabled,
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT monitorid FROM monitor WHERE productid = ?1 AND parser = ?2 AND url = ?3",
            params![&cfg.product_id, cfg.adapter.as_str(), &cfg.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn enabled_monitors(&self) -> Result<Vec<Monitor>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM monitor WHERE disable = 0 ORDER BY monitorid",
            MONITOR_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::map_monitor)?;

        let mut monitors = Vec::new();
        for monitor in rows {
            monitors.push(monitor?);
        }
        Ok(monitors)
    }

    pub fn set_last_run(&self, monitor_id: i64, when: &DateTime<Utc>) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE monitor SET last_run = ?1 WHERE monitorid = ?2",
            params![format_datetime(when), monitor_id],
        )?;
        Ok(())
    }

    /// Starts a write transaction for one dedup decision.
    pub fn begin_history(&self) -> Result<HistoryTx<'_>, StorageError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        Ok(HistoryTx { tx })
    }

    /// Live entries whose monitor allows alerts and whose (monitor, price, title)
    /// has never been alerted before.
    pub fn pending_alerts(&self) -> Result<Vec<PendingAlert>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT h.monitor_historyid, h.monitorid, h.date_when, h.product_title, h.product_url,
                    h.price, h.alert_sent, m.supplier
             FROM monitor_history h
             JOIN monitor m ON m.monitorid = h.monitorid
             WHERE h.alert_sent = 0
               AND m.disable_alerts = 0
               AND NOT EXISTS (
                   SELECT 1 FROM alert a
                   WHERE a.monitorid = h.monitorid
                     AND ROUND(a.price * 100) = ROUND(h.price * 100)
                     AND a.product_title = h.product_title
               )
             ORDER BY h.date_when, h.monitor_historyid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingAlert {
                entry: map_history(row)?,
                supplier: row.get(7)?,
            })
        })?;

        let mut pending = Vec::new();
        for alert in rows {
            pending.push(alert?);
        }
        Ok(pending)
    }

    pub fn record_alert(
        &self,
        entry: &HistoryEntry,
        channel: AlertChannel,
        sent_at: &DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO alert (monitor_historyid, monitorid, carrier, date_sent, product_title, price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.monitor_id,
                channel.as_str(),
                format_datetime(sent_at),
                &entry.product_title,
                entry.price,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_alert_sent(&self, history_ids: &[i64]) -> Result<(), StorageError> {
        let mut stmt = self
            .conn
            .prepare("UPDATE monitor_history SET alert_sent = 1 WHERE monitor_historyid = ?1")?;
        for id in history_ids {
            stmt.execute(params![id])?;
        }
        Ok(())
    }

    /// Archiving is the only change an alert ever sees.
    pub fn archive_alerts_before(&self, cutoff: &DateTime<Utc>) -> Result<usize, StorageError> {
        let n = self.conn.execute(
            "UPDATE alert SET archived = 1 WHERE archived = 0 AND date_sent < ?1",
            params![format_datetime(cutoff)],
        )?;
        Ok(n)
    }

    pub fn append_log(
        &self,
        monitor_id: Option<i64>,
        action: LogAction,
        level: LogLevel,
        comment: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO log (monitorid, action, \"when\", comment, level) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                monitor_id,
                action.as_str(),
                format_datetime(&Utc::now()),
                comment,
                level.as_str(),
            ],
        )?;
        Ok(())
    }

    fn map_monitor(row: &Row) -> Result<Monitor, rusqlite::Error> {
        let adapter: String = row.get(3)?;
        let adapter: AdapterKind = adapter
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        let last_run: Option<String> = row.get(9)?;
        let last_run = match last_run {
            Some(s) => Some(
                parse_datetime(&s)
                    .ok_or_else(|| bad_timestamp(9, &s))?,
            ),
            None => None,
        };
        let disabled: bool = row.get(7)?;
        let alerts_disabled: bool = row.get(8)?;

        Ok(Monitor {
            id: row.get(0)?,
            product_id: row.get(1)?,
            supplier: row.get(2)?,
            adapter,
            url: row.get(4)?,
            match_and: get_keywords(row, 5)?,
            match_or: get_keywords(row, 6)?,
            enabled: !disabled,
            alerts_enabled: !alerts_disabled,
            last_run,
        })
    }
}

/// One atomic read-then-write on the history of a (monitor, url) key.
/// Dropping it without `commit` rolls back.
pub struct HistoryTx<'a> {
    tx: Transaction<'a>,
}

impl HistoryTx<'_> {
    /// Most recent entry by timestamp, ties broken by insertion order.
    pub fn latest(&self, monitor_id: i64, product_url: &str) -> Result<Option<HistoryEntry>, StorageError> {
        let entry = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM monitor_history WHERE monitorid = ?1 AND product_url = ?2
                     ORDER BY date_when DESC, monitor_historyid DESC LIMIT 1",
                    HISTORY_COLUMNS
                ),
                params![monitor_id, product_url],
                map_history,
            )
            .optional()?;
        Ok(entry)
    }

    /// Flags every live entry for the key as sent; they can never alert again.
    pub fn flag_stale(&self, monitor_id: i64, product_url: &str) -> Result<usize, StorageError> {
        let n = self.tx.execute(
            "UPDATE monitor_history SET alert_sent = 1
             WHERE monitorid = ?1 AND product_url = ?2 AND alert_sent = 0",
            params![monitor_id, product_url],
        )?;
        Ok(n)
    }

    pub fn insert_live(
        &self,
        monitor_id: i64,
        product_url: &str,
        product_title: &str,
        price: f64,
        when: &DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let result = self.tx.execute(
            "INSERT INTO monitor_history (monitorid, date_when, product_title, product_url, price, alert_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![monitor_id, format_datetime(when), product_title, product_url, price],
        );
        match result {
            Ok(_) => Ok(self.tx.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation && e.extended_code == SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StorageError::DedupConflict {
                    monitor_id,
                    url: product_url.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }
}

// Read-back queries for audits of what a run stored.
#[cfg(test)]
impl SqliteStorage {
    pub fn get_monitor(&self, monitor_id: i64) -> Result<Option<Monitor>, StorageError> {
        let monitor = self
            .conn
            .query_row(
                &format!("SELECT {} FROM monitor WHERE monitorid = ?1", MONITOR_COLUMNS),
                params![monitor_id],
                Self::map_monitor,
            )
            .optional()?;
        Ok(monitor)
    }

    /// Every entry for a (monitor, url) key, oldest first.
    pub fn history_for(&self, monitor_id: i64, product_url: &str) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM monitor_history WHERE monitorid = ?1 AND product_url = ?2
             ORDER BY date_when, monitor_historyid",
            HISTORY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![monitor_id, product_url], map_history)?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    pub fn alerts_for(&self, monitor_id: i64) -> Result<Vec<crate::model::Alert>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT alertid, monitor_historyid, monitorid, carrier, date_sent, archived, product_title, price
             FROM alert WHERE monitorid = ?1 ORDER BY alertid",
        )?;
        let rows = stmt.query_map(params![monitor_id], |row| {
            Ok(crate::model::Alert {
                id: row.get(0)?,
                history_id: row.get(1)?,
                monitor_id: row.get(2)?,
                carrier: row.get(3)?,
                date_sent: get_datetime(row, 4)?,
                archived: row.get(5)?,
                product_title: row.get(6)?,
                price: row.get(7)?,
            })
        })?;

        let mut alerts = Vec::new();
        for alert in rows {
            alerts.push(alert?);
        }
        Ok(alerts)
    }

    pub fn logs_for(&self, monitor_id: i64) -> Result<Vec<crate::model::LogEntry>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT logid, monitorid, action, \"when\", comment, level FROM log
             WHERE monitorid = ?1 ORDER BY logid",
        )?;
        let rows = stmt.query_map(params![monitor_id], |row| {
            Ok(crate::model::LogEntry {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                action: row.get(2)?,
                when: get_datetime(row, 3)?,
                comment: row.get(4)?,
                level: row.get(5)?,
            })
        })?;

        let mut logs = Vec::new();
        for log in rows {
            logs.push(log?);
        }
        Ok(logs)
    }
}

/// SQLITE_CONSTRAINT | (8 << 8)
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

fn map_history(row: &Row) -> Result<HistoryEntry, rusqlite::Error> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        date_when: get_datetime(row, 2)?,
        product_title: row.get(3)?,
        product_url: row.get(4)?,
        price: row.get(5)?,
        alert_sent: row.get(6)?,
    })
}

fn get_datetime(row: &Row, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let s: String = row.get(idx)?;
    parse_datetime(&s).ok_or_else(|| bad_timestamp(idx, &s))
}

fn bad_timestamp(idx: usize, s: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("invalid timestamp '{}'", s).into())
}

fn get_keywords(row: &Row, idx: usize) -> Result<Vec<String>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn product() -> Product {
        Product {
            id: "9070xt".into(),
            price_alert_threshold: Some(600.0),
            product_type: "gpu".into(),
        }
    }

    fn monitor_cfg() -> MonitorConfig {
        MonitorConfig {
            product_id: "9070xt".into(),
            adapter: AdapterKind::Scan,
            supplier: None,
            url: "https://www.scan.co.uk/shop/gpus".into(),
            match_and: vec!["9070xt".into(), "16gb".into()],
            match_or: vec![],
            enabled: true,
            alerts_enabled: true,
        }
    }

    #[test]
    fn monitor_upsert_is_idempotent_and_keeps_keyword_lists() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();

        let id = storage.upsert_monitor(&monitor_cfg()).unwrap();
        let mut changed = monitor_cfg();
        changed.match_or = vec!["sapphire".into()];
        changed.alerts_enabled = false;
        assert_eq!(storage.upsert_monitor(&changed).unwrap(), id);

        let monitor = storage.get_monitor(id).unwrap().unwrap();
        assert_eq!(monitor.adapter, AdapterKind::Scan);
        assert_eq!(monitor.supplier, "Scan");
        assert_eq!(monitor.match_and, vec!["9070xt", "16gb"]);
        assert_eq!(monitor.match_or, vec!["sapphire"]);
        assert!(monitor.enabled);
        assert!(!monitor.alerts_enabled);
        assert_eq!(monitor.last_run, None);
    }

    #[test]
    fn monitor_requires_existing_product() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        assert!(matches!(
            storage.upsert_monitor(&monitor_cfg()),
            Err(StorageError::Database(_))
        ));
    }

    #[test]
    fn disabled_monitors_are_not_listed() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();
        storage.upsert_monitor(&monitor_cfg()).unwrap();
        let mut off = monitor_cfg();
        off.url = "https://www.scan.co.uk/shop/other".into();
        off.enabled = false;
        storage.upsert_monitor(&off).unwrap();

        let monitors = storage.enabled_monitors().unwrap();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].url, "https://www.scan.co.uk/shop/gpus");
    }

    #[test]
    fn second_live_entry_for_same_url_is_a_conflict() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();
        let id = storage.upsert_monitor(&monitor_cfg()).unwrap();
        let now = Utc::now();

        let tx = storage.begin_history().unwrap();
        tx.insert_live(id, "https://x.test/a", "A", 500.0, &now).unwrap();
        let err = tx
            .insert_live(id, "https://x.test/a", "A", 450.0, &(now + Duration::seconds(1)))
            .unwrap_err();
        assert!(matches!(err, StorageError::DedupConflict { .. }));
    }

    #[test]
    fn uncommitted_history_is_rolled_back() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();
        let id = storage.upsert_monitor(&monitor_cfg()).unwrap();
        {
            let tx = storage.begin_history().unwrap();
            tx.insert_live(id, "https://x.test/a", "A", 500.0, &Utc::now()).unwrap();
        }
        assert!(storage.history_for(id, "https://x.test/a").unwrap().is_empty());
    }

    #[test]
    fn archiving_only_touches_old_alerts() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();
        let id = storage.upsert_monitor(&monitor_cfg()).unwrap();
        let now = Utc::now();

        let tx = storage.begin_history().unwrap();
        let hid = tx.insert_live(id, "https://x.test/a", "A", 500.0, &now).unwrap();
        tx.commit().unwrap();
        let entry = storage.history_for(id, "https://x.test/a").unwrap().remove(0);
        assert_eq!(entry.id, hid);

        storage
            .record_alert(&entry, AlertChannel::PushBullet, &(now - Duration::days(30)))
            .unwrap();
        storage.record_alert(&entry, AlertChannel::Telegram, &now).unwrap();

        assert_eq!(storage.archive_alerts_before(&(now - Duration::days(7))).unwrap(), 1);
        let alerts = storage.alerts_for(id).unwrap();
        assert!(alerts[0].archived);
        assert!(!alerts[1].archived);
        assert_eq!(alerts[1].carrier, "Telegram");
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.db");
        let path = path.to_str().unwrap();
        {
            let storage = SqliteStorage::new(path).unwrap();
            storage.upsert_product(&product()).unwrap();
            let id = storage.upsert_monitor(&monitor_cfg()).unwrap();
            storage
                .append_log(Some(id), LogAction::ScrapingStarted, LogLevel::Info, "started")
                .unwrap();
        }
        let storage = SqliteStorage::new(path).unwrap();
        assert_eq!(storage.get_product("9070xt").unwrap(), Some(product()));
        let logs = storage.logs_for(1).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "ScrapingStarted");
        assert_eq!(logs[0].level, "INFO");
    }

    #[test]
    fn log_stream_is_scoped_per_monitor() {
        let storage = SqliteStorage::new(":memory:").unwrap();
        storage.upsert_product(&product()).unwrap();
        let id = storage.upsert_monitor(&monitor_cfg()).unwrap();

        storage
            .append_log(None, LogAction::Notify, LogLevel::Error, "Telegram failed")
            .unwrap();
        storage
            .append_log(Some(id), LogAction::ScrapingStarted, LogLevel::Info, "started")
            .unwrap();
        storage
            .append_log(Some(id), LogAction::ScrapingFinished, LogLevel::Warning, "0 items")
            .unwrap();

        let logs = storage.logs_for(id).unwrap();
        let actions: Vec<&str> = logs.iter().map(|l| l.action.as_str()).collect();
        assert_eq!(actions, vec!["ScrapingStarted", "ScrapingFinished"]);
        assert!(logs.iter().all(|l| l.monitor_id == Some(id)));
        assert_eq!(logs[1].level, "WARNING");
        assert_eq!(storage.get_monitor(id).unwrap().unwrap().last_run, None);
    }
}
