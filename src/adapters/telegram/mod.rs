//! Telegram adapter. Bot API gateway and wire-type mapping.

pub mod bot_api;
pub mod mapper;

pub use bot_api::{BotApiConfig, BotApiGateway};
