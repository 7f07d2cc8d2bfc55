//! Fakes shared by use case tests. No network.

use crate::adapters::persistence::SqliteRepo;
use crate::domain::{
    ChatInfo, ChatKind, ChatLookupError, ChatRef, DeliveryError, DeliveryErrorKind, NewPost,
};
use crate::ports::ChatGateway;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Scripted gateway. Lookups answer from a fixed table; sends pop per-target
/// scripted results and default to success once the script runs out.
#[derive(Default)]
pub struct FakeGateway {
    chats: HashMap<ChatRef, Result<ChatInfo, ChatLookupError>>,
    scripts: Mutex<HashMap<ChatRef, VecDeque<Result<(), DeliveryError>>>>,
    sent: Mutex<Vec<(ChatRef, String)>>,
    send_delay: Duration,
    panics_on: Option<ChatRef>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(mut self, chat: &str, info: ChatInfo) -> Self {
        self.chats.insert(chat.parse().unwrap(), Ok(info));
        self
    }

    pub fn with_lookup_error(mut self, chat: &str, err: ChatLookupError) -> Self {
        self.chats.insert(chat.parse().unwrap(), Err(err));
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// `send_message` to `chat` panics instead of returning.
    pub fn with_panic_on(mut self, chat: &str) -> Self {
        self.panics_on = Some(chat.parse().unwrap());
        self
    }

    pub fn script(self, chat: &str, results: Vec<Result<(), DeliveryError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(chat.parse().unwrap(), results.into());
        self
    }

    pub fn sends_to(&self, chat: &str) -> usize {
        let chat: ChatRef = chat.parse().unwrap();
        self.sent.lock().unwrap().iter().filter(|(c, _)| c == &chat).count()
    }

    pub fn total_sends(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ChatGateway for FakeGateway {
    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ChatLookupError> {
        self.chats.get(chat).cloned().unwrap_or_else(|| {
            Err(ChatLookupError::NotFound {
                chat: chat.to_string(),
                detail: "400 Bad Request: chat not found".into(),
            })
        })
    }

    async fn send_message(&self, chat: &ChatRef, text: &str) -> Result<(), DeliveryError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        if self.panics_on.as_ref() == Some(chat) {
            panic!("fake gateway panic for {}", chat);
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat.clone(), text.to_string()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(chat)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(()))
    }
}

pub fn chat_info(id: i64, title: &str, username: Option<&str>) -> ChatInfo {
    ChatInfo {
        id,
        kind: ChatKind::Channel,
        title: title.to_string(),
        username: username.map(str::to_string),
        description: Some(format!("{} description", title)),
        member_count: Some(321),
        avatar: None,
    }
}

pub fn denied(chat: &str) -> DeliveryError {
    DeliveryError::new(
        chat,
        DeliveryErrorKind::Permission,
        "403 Forbidden: bot was kicked from the supergroup chat",
    )
}

pub fn flaky(chat: &str) -> DeliveryError {
    DeliveryError::new(chat, DeliveryErrorKind::Transient, "502 Bad Gateway")
}

/// A post that became due a minute ago.
pub fn due_post(targets: &[&str]) -> NewPost {
    NewPost {
        content: "Launch day! v2 is out.".into(),
        targets: targets.iter().map(|t| t.parse().unwrap()).collect(),
        scheduled_at: minutes_ago(1),
        optimal_timing: false,
    }
}

pub fn minutes_ago(n: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(n)
}

pub async fn temp_repo() -> (SqliteRepo, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRepo::connect(dir.path()).await.unwrap();
    (repo, dir)
}
