// Core structs: Product, Monitor, HistoryEntry, Alert, LogEntry, RawItem
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// A tracked product, e.g. a GPU model. Monitors on many sites point at one product.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    /// `None` disables alerting for every monitor of this product.
    pub price_alert_threshold: Option<f64>,
    pub product_type: String,
}

/// Which site adapter parses a monitor's pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterKind {
    #[serde(rename = "AWDIT")]
    Awdit,
    #[serde(rename = "CCLOnline")]
    CclOnline,
    Overclockers,
    Scan,
    Currys,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Awdit => "AWDIT",
            AdapterKind::CclOnline => "CCLOnline",
            AdapterKind::Overclockers => "Overclockers",
            AdapterKind::Scan => "Scan",
            AdapterKind::Currys => "Currys",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "awdit" => Ok(AdapterKind::Awdit),
            "cclonline" => Ok(AdapterKind::CclOnline),
            "overclockers" => Ok(AdapterKind::Overclockers),
            "scan" => Ok(AdapterKind::Scan),
            "currys" => Ok(AdapterKind::Currys),
            other => Err(StorageError::InvalidData(format!("unknown adapter '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub id: i64,
    pub product_id: String,
    pub supplier: String,
    pub adapter: AdapterKind,
    pub url: String,
    pub match_and: Vec<String>,
    pub match_or: Vec<String>,
    pub enabled: bool,
    pub alerts_enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
}

/// One observed qualifying price for a (monitor, product url) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub monitor_id: i64,
    pub date_when: DateTime<Utc>,
    pub product_title: String,
    pub product_url: String,
    pub price: f64,
    pub alert_sent: bool,
}

/// A live history entry ready to go out, joined with what the alert text needs.
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub entry: HistoryEntry,
    pub supplier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertChannel {
    Telegram,
    PushBullet,
    #[serde(rename = "SMS_Twilio")]
    SmsTwilio,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Telegram => "Telegram",
            AlertChannel::PushBullet => "PushBullet",
            AlertChannel::SmsTwilio => "SMS_Twilio",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record that a notification went out. Only `archived` may change afterwards.
/// Rows are written column by column; this struct is the read-back shape.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub history_id: i64,
    pub monitor_id: i64,
    pub carrier: String,
    pub date_sent: DateTime<Utc>,
    pub archived: bool,
    pub product_title: String,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    ScrapingStarted,
    ScrapingFinished,
    Scraping,
    Notify,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::ScrapingStarted => "ScrapingStarted",
            LogAction::ScrapingFinished => "ScrapingFinished",
            LogAction::Scraping => "Scraping",
            LogAction::Notify => "Notify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub monitor_id: Option<i64>,
    pub action: String,
    pub when: DateTime<Utc>,
    pub comment: String,
    pub level: String,
}

/// A fetched page, kept as raw HTML so parsing never crosses an await point.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub html: String,
}

/// A product card as read off a listing page, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub price: f64,
    pub url: String,
    pub title: String,
    pub in_stock: bool,
    /// Normalized card text, used for keyword matching.
    pub text: String,
}

#[derive(Debug, Error)]
#[error("could not pass human verification at {0}")]
pub struct CaptchaError(pub String);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Captcha(#[from] CaptchaError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no product cards found on {0}")]
    NoProductRegion(String),
    #[error("invalid selector '{0}'")]
    Selector(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("concurrent write on live entry for monitor {monitor_id} and {url}")]
    DedupConflict { monitor_id: i64, url: String },
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("api error: {0}")]
    ApiError(String),
    #[error("channel unreachable")]
    Unreachable,
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::ApiError(e.to_string())
    }
}

/// The step of a monitor run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvePages,
    ExtractItems,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvePages => "resolve_pages",
            Stage::ExtractItems => "extract_items",
            Stage::Record => "record",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum MonitorFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
#[error("monitor {monitor_id} failed during {stage}: {source}")]
pub struct MonitorError {
    pub monitor_id: i64,
    pub stage: Stage,
    #[source]
    pub source: MonitorFailure,
}

impl MonitorError {
    pub fn new(monitor_id: i64, stage: Stage, source: impl Into<MonitorFailure>) -> Self {
        Self {
            monitor_id,
            stage,
            source: source.into(),
        }
    }
}
