//! Minimal Telegram Bot API client.
//!
//! Two halves: `TelegramTransport`, the synchronous `ChatTransport` the
//! messenger's delivery thread drives, and `TelegramPoller`, the async
//! getUpdates long-poll feeding the command surface.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use autobot_core::AutobotError;
use autobot_messenger::ChatTransport;

fn api_url(token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{token}/{method}")
}

// ── Outbound ─────────────────────────────────────────────────────────────────

pub struct TelegramTransport {
    token: String,
    http: reqwest::blocking::Client,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Self {
        TelegramTransport {
            token: token.into(),
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn check(resp: reqwest::blocking::Response) -> Result<(), AutobotError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().unwrap_or_default();
        Err(AutobotError::Other(format!(
            "telegram API {status}: {body}"
        )))
    }
}

impl ChatTransport for TelegramTransport {
    fn send_text(&self, chat_id: i64, text: &str) -> Result<(), AutobotError> {
        // Telegram caps messages at ~4096 characters.
        let mut end = text.len().min(4000);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let text = &text[..end];
        let resp = self
            .http
            .post(api_url(&self.token, "sendMessage"))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .map_err(|e| AutobotError::Other(e.to_string()))?;
        Self::check(resp)
    }

    fn send_photo(&self, chat_id: i64, png: &[u8], caption: &str) -> Result<(), AutobotError> {
        let part = reqwest::blocking::multipart::Part::bytes(png.to_vec())
            .file_name("screenshot.png")
            .mime_str("image/png")
            .map_err(|e| AutobotError::Other(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);
        let resp = self
            .http
            .post(api_url(&self.token, "sendPhoto"))
            .multipart(form)
            .send()
            .map_err(|e| AutobotError::Other(e.to_string()))?;
        Self::check(resp)
    }

    fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), AutobotError> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .file("document", path)
            .map_err(|e| AutobotError::Other(e.to_string()))?;
        let resp = self
            .http
            .post(api_url(&self.token, "sendDocument"))
            .multipart(form)
            .send()
            .map_err(|e| AutobotError::Other(e.to_string()))?;
        Self::check(resp)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// One inbound chat message worth handling.
#[derive(Clone, Debug)]
pub struct Incoming {
    pub chat_id: i64,
    pub text: String,
}

pub struct TelegramPoller {
    token: String,
    http: reqwest::Client,
    offset: i64,
}

impl TelegramPoller {
    pub fn new(token: impl Into<String>) -> Self {
        TelegramPoller {
            token: token.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(40))
                .build()
                .unwrap_or_default(),
            offset: 0,
        }
    }

    /// Long-poll for the next batch of text messages.
    pub async fn poll(&mut self) -> Vec<Incoming> {
        let resp = self
            .http
            .post(api_url(&self.token, "getUpdates"))
            .json(&json!({
                "offset": self.offset,
                "timeout": 30,
                "allowed_updates": ["message"],
            }))
            .send()
            .await;

        let value: Value = match resp {
            Ok(r) => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "getUpdates body unreadable");
                    return Vec::new();
                }
            },
            Err(e) => {
                warn!(error = %e, "getUpdates failed");
                tokio::time::sleep(Duration::from_secs(3)).await;
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        if let Some(updates) = value["result"].as_array() {
            for update in updates {
                if let Some(id) = update["update_id"].as_i64() {
                    self.offset = self.offset.max(id + 1);
                }
                let message = &update["message"];
                let (Some(chat_id), Some(text)) = (
                    message["chat"]["id"].as_i64(),
                    message["text"].as_str(),
                ) else {
                    continue;
                };
                out.push(Incoming {
                    chat_id,
                    text: text.to_string(),
                });
            }
        }
        out
    }
}
