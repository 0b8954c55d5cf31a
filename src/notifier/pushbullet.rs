use crate::model::{AlertChannel, NotifyError};
use crate::notifier::{Notifier, check_response, http_client, transport_error};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

const PUSHES_URL: &str = "https://api.pushbullet.com/v2/pushes";

#[derive(Debug, Serialize)]
struct NotePush<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'a str,
    body: &'a str,
}

pub struct PushBulletNotifier {
    token: String,
    client: Client,
}

impl PushBulletNotifier {
    pub fn new(token: String) -> Result<Self, NotifyError> {
        Ok(Self {
            token,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl Notifier for PushBulletNotifier {
    fn channel(&self) -> AlertChannel {
        AlertChannel::PushBullet
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let push = NotePush {
            kind: "note",
            title,
            body,
        };
        let response = self
            .client
            .post(PUSHES_URL)
            .header("Access-Token", &self.token)
            .json(&push)
            .send()
            .await
            .map_err(transport_error)?;
        check_response(AlertChannel::PushBullet, response).await?;
        info!("Pushbullet note pushed: {}", title);
        Ok(())
    }
}
