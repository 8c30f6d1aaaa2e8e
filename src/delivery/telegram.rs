//! Telegram Bot API transport
//!
//! Endpoint: `POST {api_base}/bot{token}/sendMessage`
//! Body: `{"chat_id": ..., "text": ..., "parse_mode": "HTML", "disable_web_page_preview": true}`
//! Reply: `{"ok": true, "result": {...}}` or `{"ok": false, "error_code": 403, "description": "..."}`

use crate::delivery::sink::{DeliveryError, DeliverySink};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramSink {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramSink {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        Self::with_api_base(DEFAULT_TELEGRAM_API, token, timeout)
    }

    pub fn with_api_base(api_base: &str, token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        if token.trim().is_empty() {
            return Err(DeliveryError::Other("telegram token is empty".to_string()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token.trim()),
        })
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn deliver(&self, subscriber_id: &str, text: &str) -> Result<(), DeliveryError> {
        let body = SendMessage {
            chat_id: subscriber_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status().as_u16();
        let raw = response.text().await?;

        check_reply(status, &raw)
    }

    fn sink_type(&self) -> &'static str {
        "telegram"
    }
}

fn check_reply(status: u16, raw: &str) -> Result<(), DeliveryError> {
    match serde_json::from_str::<ApiReply>(raw) {
        Ok(reply) if reply.ok => Ok(()),
        Ok(reply) => Err(DeliveryError::Rejected {
            status: reply.error_code.unwrap_or(status),
            description: reply.description.unwrap_or_else(|| "no description".to_string()),
        }),
        Err(_) if (200..300).contains(&status) => Ok(()),
        Err(_) => Err(DeliveryError::Rejected {
            status,
            description: raw.chars().take(200).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_rejected() {
        assert!(TelegramSink::new("  ", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_endpoint_shape() {
        let sink = TelegramSink::with_api_base("http://localhost:8081/", "123:ABC", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.endpoint, "http://localhost:8081/bot123:ABC/sendMessage");
    }

    #[test]
    fn test_check_reply() {
        assert!(check_reply(200, r#"{"ok":true,"result":{"message_id":1}}"#).is_ok());

        let err = check_reply(403, r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#)
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 403, .. }));

        let err = check_reply(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 502, .. }));
    }

    #[test]
    fn test_send_message_body() {
        let body = SendMessage {
            chat_id: "-1001",
            text: "<b>hi</b>",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "-1001");
        assert_eq!(json["parse_mode"], "HTML");
    }
}
