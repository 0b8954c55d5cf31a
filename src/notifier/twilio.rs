// SMS through the Twilio REST API.
use crate::model::{AlertChannel, NotifyError};
use crate::notifier::{Notifier, check_response, http_client, transport_error};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

/// Longer bodies are truncated; Twilio rejects anything past 1600 characters.
const MAX_SMS_CHARS: usize = 1600;

pub struct TwilioNotifier {
    account_sid: String,
    auth_token: String,
    from: String,
    to: String,
    client: Client,
}

impl TwilioNotifier {
    pub fn new(account_sid: String, auth_token: String, from: String, to: String) -> Result<Self, NotifyError> {
        Ok(Self {
            account_sid,
            auth_token,
            from,
            to,
            client: http_client()?,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }
}

fn sms_body(title: &str, body: &str) -> String {
    format!("{}\n{}", title, body).chars().take(MAX_SMS_CHARS).collect()
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn channel(&self) -> AlertChannel {
        AlertChannel::SmsTwilio
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let params = [
            ("To", self.to.clone()),
            ("From", self.from.clone()),
            ("Body", sms_body(title, body)),
        ];
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;
        check_response(AlertChannel::SmsTwilio, response).await?;
        info!("SMS sent to {}", self.to);
        Ok(())
    }
}
