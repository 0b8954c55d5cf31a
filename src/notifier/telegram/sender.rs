// notifier/telegram/sender.rs

use crate::model::{AlertChannel, NotifyError};
use crate::notifier::telegram::TelegramNotifier;
use crate::notifier::{check_response, transport_error};
use tracing::info;

/// Sends one text message through the bot API.
pub async fn send_text(notifier: &TelegramNotifier, text: &str) -> Result<(), NotifyError> {
    let params = [
        ("chat_id", notifier.chat_id.to_string()),
        ("text", text.to_string()),
    ];
    let response = notifier
        .client
        .post(notifier.api_url())
        .form(&params)
        .send()
        .await
        .map_err(transport_error)?;
    check_response(AlertChannel::Telegram, response).await?;
    info!("Telegram message sent ({} chars)", text.chars().count());
    Ok(())
}

/// Splits on line boundaries so no chunk exceeds `limit` characters. A single
/// line longer than the limit is cut hard.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
