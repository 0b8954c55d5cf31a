use crate::model::{AdapterKind, AlertChannel};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductConfig {
    pub id: String,
    #[serde(default)]
    pub price_alert_threshold: Option<f64>,
    pub product_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub product_id: String,
    pub adapter: AdapterKind,
    /// Display name used in alert text, defaults to the adapter name.
    #[serde(default)]
    pub supplier: Option<String>,
    pub url: String,
    #[serde(default)]
    pub match_and: Vec<String>,
    #[serde(default)]
    pub match_or: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
}

impl MonitorConfig {
    pub fn supplier_name(&self) -> String {
        self.supplier
            .clone()
            .unwrap_or_else(|| self.adapter.as_str().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel")]
pub enum NotifierConfig {
    Telegram { bot_token: String, chat_id: i64 },
    PushBullet { token: String },
    #[serde(rename = "SMS_Twilio")]
    TwilioSms {
        account_sid: String,
        auth_token: String,
        send_from_phone: String,
        send_to_phone: String,
    },
}

impl NotifierConfig {
    pub fn channel(&self) -> AlertChannel {
        match self {
            NotifierConfig::Telegram { .. } => AlertChannel::Telegram,
            NotifierConfig::PushBullet { .. } => AlertChannel::PushBullet,
            NotifierConfig::TwilioSms { .. } => AlertChannel::SmsTwilio,
        }
    }
}

/// One year.
const MAX_HEARTBEAT_HOURS: u64 = 24 * 366;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub database_path: String,
    /// Mean delay before each secondary page fetch.
    #[serde(default = "default_page_delay")]
    pub scrape_delay_between_pages_seconds: f64,
    /// 0.2 turns a 5 second delay into anything between 4 and 6 seconds.
    #[serde(default = "default_random_factor")]
    pub scrape_delay_random_factor: f64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_check_jitter")]
    pub check_interval_jitter_seconds: u64,
    #[serde(default = "default_retry_increment")]
    pub retry_increment_seconds: u64,
    #[serde(default = "default_heartbeat_hours")]
    pub heartbeat_hours: u64,
    /// Sent alerts older than this are archived after each dispatch. 0 keeps them live.
    #[serde(default = "default_archive_days")]
    pub alert_archive_days: u64,
    #[serde(default)]
    pub render_service_url: Option<String>,
    #[serde(default)]
    pub debug_html_dir: Option<String>,
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

impl AppConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.scrape_delay_between_pages_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Zero disables the heartbeat.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_hours.saturating_mul(60 * 60))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.scrape_delay_random_factor) {
            return Err(ConfigError::Invalid(format!(
                "scrape_delay_random_factor must be in [0, 1), got {}",
                self.scrape_delay_random_factor
            )));
        }
        if self.scrape_delay_between_pages_seconds < 0.0
            || !self.scrape_delay_between_pages_seconds.is_finite()
        {
            return Err(ConfigError::Invalid(
                "scrape_delay_between_pages_seconds must be a non-negative number".into(),
            ));
        }
        if self.heartbeat_hours > MAX_HEARTBEAT_HOURS {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_hours must be at most {}, got {}",
                MAX_HEARTBEAT_HOURS, self.heartbeat_hours
            )));
        }
        for product in &self.products {
            if let Some(threshold) = product.price_alert_threshold {
                if !(threshold > 0.0 && threshold.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "product '{}' has non-positive threshold {}",
                        product.id, threshold
                    )));
                }
            }
        }
        for monitor in &self.monitors {
            if !self.products.iter().any(|p| p.id == monitor.product_id) {
                return Err(ConfigError::Invalid(format!(
                    "monitor for {} references unknown product '{}'",
                    monitor.url, monitor.product_id
                )));
            }
            url::Url::parse(&monitor.url)
                .map_err(|e| ConfigError::Invalid(format!("bad monitor url {}: {}", monitor.url, e)))?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "prices.db".into()
}

fn default_page_delay() -> f64 {
    5.0
}

fn default_random_factor() -> f64 {
    0.2
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    600
}

fn default_check_jitter() -> u64 {
    120
}

fn default_retry_increment() -> u64 {
    30
}

fn default_heartbeat_hours() -> u64 {
    4
}

fn default_archive_days() -> u64 {
    30
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "database_path": "test.db",
        "notifiers": [
            { "channel": "PushBullet", "token": "o.abc" },
            { "channel": "Telegram", "bot_token": "123:xyz", "chat_id": 42 }
        ],
        "products": [
            { "id": "9070xt", "price_alert_threshold": 600, "product_type": "9070xt" }
        ],
        "monitors": [
            {
                "product_id": "9070xt",
                "adapter": "AWDIT",
                "url": "https://www.awd-it.co.uk/components/graphics-cards/radeon.html",
                "match_and": ["9070xt"]
            }
        ]
    }"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.database_path, "test.db");
        assert_eq!(config.scrape_delay_between_pages_seconds, 5.0);
        assert_eq!(config.scrape_delay_random_factor, 0.2);
        assert_eq!(config.check_interval_seconds, 600);
        assert_eq!(config.heartbeat_hours, 4);
        assert_eq!(config.alert_archive_days, 30);
        assert_eq!(config.notifiers.len(), 2);
        assert_eq!(config.notifiers[0].channel(), AlertChannel::PushBullet);

        let monitor = &config.monitors[0];
        assert_eq!(monitor.adapter, AdapterKind::Awdit);
        assert!(monitor.enabled && monitor.alerts_enabled);
        assert!(monitor.match_or.is_empty());
        assert_eq!(monitor.supplier_name(), "AWDIT");
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let bad = SAMPLE.replace("\"price_alert_threshold\": 600", "\"price_alert_threshold\": 0");
        assert!(matches!(parse_config(&bad), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_monitor_with_unknown_product() {
        let bad = SAMPLE.replace("\"product_id\": \"9070xt\"", "\"product_id\": \"5090\"");
        assert!(matches!(parse_config(&bad), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn heartbeat_hours_are_bounded() {
        let bad = SAMPLE.replace(
            "\"database_path\": \"test.db\",",
            "\"database_path\": \"test.db\", \"heartbeat_hours\": 18446744073709551615,",
        );
        assert!(matches!(parse_config(&bad), Err(ConfigError::Invalid(_))));

        let mut config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.heartbeat(), Duration::from_secs(4 * 60 * 60));
        config.heartbeat_hours = u64::MAX;
        assert_eq!(config.heartbeat(), Duration::from_secs(u64::MAX));
        config.heartbeat_hours = 0;
        assert!(config.heartbeat().is_zero());
    }

    #[test]
    fn missing_threshold_is_allowed() {
        let ok = SAMPLE.replace("\"price_alert_threshold\": 600,", "");
        let config = parse_config(&ok).unwrap();
        assert_eq!(config.products[0].price_alert_threshold, None);
    }
}
