// Outbound notification channels and the alert dispatcher.
pub mod dispatch;
pub mod pushbullet;
pub mod telegram;
pub mod twilio;

use crate::config::NotifierConfig;
use crate::model::{AlertChannel, NotifyError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use dispatch::AlertDispatcher;
pub use pushbullet::PushBulletNotifier;
pub use telegram::TelegramNotifier;
pub use twilio::TwilioNotifier;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> AlertChannel;

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

pub fn build_notifiers(configs: &[NotifierConfig]) -> Result<Vec<Arc<dyn Notifier>>, NotifyError> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::with_capacity(configs.len());
    for cfg in configs {
        let notifier: Arc<dyn Notifier> = match cfg {
            NotifierConfig::Telegram { bot_token, chat_id } => {
                Arc::new(TelegramNotifier::new(bot_token.clone(), *chat_id)?)
            }
            NotifierConfig::PushBullet { token } => Arc::new(PushBulletNotifier::new(token.clone())?),
            NotifierConfig::TwilioSms {
                account_sid,
                auth_token,
                send_from_phone,
                send_to_phone,
            } => Arc::new(TwilioNotifier::new(
                account_sid.clone(),
                auth_token.clone(),
                send_from_phone.clone(),
                send_to_phone.clone(),
            )?),
        };
        notifiers.push(notifier);
    }
    Ok(notifiers)
}

/// Sends a plain status message (startup, heartbeat, connectivity) to every
/// channel. Failures are logged and dropped.
pub async fn broadcast(notifiers: &[Arc<dyn Notifier>], title: &str, body: &str) {
    let sends = notifiers.iter().map(|n| async move { (n.channel(), n.send(title, body).await) });
    for (channel, result) in futures::future::join_all(sends).await {
        if let Err(e) = result {
            warn!("{} status message failed: {}", channel, e);
        }
    }
}

fn http_client() -> Result<Client, NotifyError> {
    Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::ApiError(format!("cannot build http client: {}", e)))
}

/// Turns a non-2xx answer into an error carrying the response body.
async fn check_response(channel: AlertChannel, response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|_| "unknown".into());
    if !status.is_success() {
        warn!("{} API responded [{}]: {}", channel, status, body);
        return Err(NotifyError::ApiError(format!("{} answered {}: {}", channel, status, body)));
    }
    debug!("{} response [{}]: {}", channel, status, body);
    Ok(())
}

/// Maps transport failures: timeouts and refused connections mean the channel is unreachable.
fn transport_error(e: reqwest::Error) -> NotifyError {
    if e.is_timeout() || e.is_connect() {
        NotifyError::Unreachable
    } else {
        NotifyError::from(e)
    }
}
