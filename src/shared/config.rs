//! Application configuration. Bot credentials, paths, dispatcher tuning.

use crate::adapters::telegram::BotApiConfig;
use crate::domain::DomainError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BOT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_AI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_AI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// Bot token from @BotFather. Read from TELEPILOT_BOT_TOKEN.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Bot API base URL (default https://api.telegram.org). Read from TELEPILOT_BOT_API_URL.
    #[serde(default)]
    pub bot_api_url: Option<String>,

    #[serde(default)]
    pub data_dir: Option<String>,

    /// Per-request timeout for Bot API calls, seconds (default 10).
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// Sleep between dispatcher runs in daemon mode, seconds (default 60).
    #[serde(default)]
    pub dispatch_interval_secs: Option<u64>,

    /// Max concurrent sends within one post (default 4).
    #[serde(default)]
    pub dispatch_concurrency: Option<usize>,

    /// Sends per target before a transient failure becomes final (default 3).
    #[serde(default)]
    pub max_delivery_tries: Option<u32>,

    /// Lease held on a claimed post, seconds (default 300).
    #[serde(default)]
    pub claim_lease_secs: Option<u64>,

    // ─────────────────────────────────────────────────────────────────────────
    // Suggestion backend
    // ─────────────────────────────────────────────────────────────────────────
    /// Read from TELEPILOT_AI_API_KEY.
    #[serde(default)]
    pub ai_api_key: Option<String>,

    #[serde(default)]
    pub ai_api_url: Option<String>,

    #[serde(default)]
    pub ai_model: Option<String>,

    #[serde(default)]
    pub ai_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("TELEPILOT").try_parsing(true));
        if let Ok(path) = std::env::var("TELEPILOT_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn data_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.data_dir.as_deref().unwrap_or("./data"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(10))
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs.unwrap_or(60))
    }

    pub fn dispatch_concurrency_or_default(&self) -> usize {
        self.dispatch_concurrency.unwrap_or(4).max(1)
    }

    pub fn max_delivery_tries_or_default(&self) -> u32 {
        self.max_delivery_tries.unwrap_or(3).max(1)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs.unwrap_or(300))
    }

    /// Explicit Bot API settings for the gateway constructor. Fails if no token is set.
    pub fn bot_api_config(&self) -> Result<BotApiConfig, DomainError> {
        let token = self
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                DomainError::Config("Set TELEPILOT_BOT_TOKEN (env or .env). Get one from @BotFather".into())
            })?;
        Ok(BotApiConfig {
            token,
            api_url: self
                .bot_api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BOT_API_URL.to_string()),
            timeout: self.request_timeout(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Suggestion backend helpers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn ai_api_key(&self) -> Option<String> {
        self.ai_api_key.clone().filter(|k| !k.trim().is_empty())
    }

    pub fn ai_api_url_or_default(&self) -> String {
        self.ai_api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_AI_API_URL.to_string())
    }

    pub fn ai_model_or_default(&self) -> String {
        self.ai_model
            .clone()
            .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string())
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs.unwrap_or(30))
    }

    pub fn is_ai_configured(&self) -> bool {
        self.ai_api_key().is_some()
    }
}
