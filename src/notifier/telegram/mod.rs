pub mod sender;

use crate::model::{AlertChannel, NotifyError};
use crate::notifier::{Notifier, http_client};
use async_trait::async_trait;
use reqwest::Client;

/// Telegram's hard limit on one message.
const MAX_MESSAGE_CHARS: usize = 4096;

pub struct TelegramNotifier {
    pub bot_token: String,
    pub chat_id: i64,
    pub client: Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: i64) -> Result<Self, NotifyError> {
        Ok(Self {
            bot_token,
            chat_id,
            client: http_client()?,
        })
    }

    fn api_url(&self) -> String {
        format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> AlertChannel {
        AlertChannel::Telegram
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let message = format!("{}\n\n{}", title, body);
        for chunk in sender::split_message(&message, MAX_MESSAGE_CHARS) {
            sender::send_text(self, &chunk).await?;
        }
        Ok(())
    }
}
