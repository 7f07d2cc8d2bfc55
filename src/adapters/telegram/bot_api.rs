//! Implements ChatGateway over the Telegram Bot API (HTTPS + JSON).
//!
//! One reqwest client per gateway, built from an explicit `BotApiConfig`.
//! Every call is bounded by the client timeout; a timeout surfaces as a typed
//! error instead of hanging the caller.

use crate::adapters::telegram::mapper::{self, ApiChat, ApiEnvelope, ApiFailure};
use crate::domain::{ChatInfo, ChatLookupError, ChatRef, DeliveryError, DomainError};
use crate::ports::ChatGateway;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Bot credentials and transport settings, passed in by the caller.
#[derive(Debug, Clone)]
pub struct BotApiConfig {
    pub token: String,
    /// Base URL without the `/bot<token>` suffix, e.g. `https://api.telegram.org`.
    pub api_url: String,
    pub timeout: Duration,
}

pub struct BotApiGateway {
    client: reqwest::Client,
    /// `{api_url}/bot{token}`. Never logged.
    base_url: String,
}

impl BotApiGateway {
    pub fn new(config: BotApiConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ApiFailure> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(transport_failure)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_failure)?;
        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)
            .map_err(|e| ApiFailure::Malformed(format!("HTTP {}: {}", status, e)))?;
        mapper::unwrap_envelope(envelope, status.as_u16())
    }
}

/// Strip the URL (it embeds the bot token) before the error is kept anywhere.
fn transport_failure(e: reqwest::Error) -> ApiFailure {
    if e.is_timeout() {
        ApiFailure::Timeout
    } else {
        ApiFailure::Network(e.without_url().to_string())
    }
}

#[async_trait]
impl ChatGateway for BotApiGateway {
    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ChatLookupError> {
        let params = serde_json::json!({ "chat_id": mapper::chat_id_param(chat) });
        let raw: ApiChat = self
            .call("getChat", params.clone())
            .await
            .map_err(|f| mapper::lookup_error(chat, f))?;

        // Member count fails independently (e.g. channels where the bot is not admin).
        let member_count = match self.call::<u64>("getChatMemberCount", params).await {
            Ok(n) => Some(n),
            Err(f) => {
                warn!(chat = %chat, error = ?f, "member count unavailable");
                None
            }
        };

        let info = mapper::chat_info(raw, member_count);
        debug!(chat = %chat, id = info.id, title = %info.title, "chat resolved");
        Ok(info)
    }

    async fn send_message(&self, chat: &ChatRef, text: &str) -> Result<(), DeliveryError> {
        let params = serde_json::json!({
            "chat_id": mapper::chat_id_param(chat),
            "text": text,
        });
        self.call::<serde_json::Value>("sendMessage", params)
            .await
            .map_err(|f| mapper::delivery_error(chat, f))?;
        debug!(chat = %chat, len = text.len(), "message sent");
        Ok(())
    }
}
