//! Group search use case: live lookup for explicit identifiers, labelled
//! fallback listings for everything the platform cannot answer.

use crate::domain::{ChatInfo, ChatLookupError, ChatQuery, ChatRef, GroupListing};
use crate::ports::{ChatGateway, GroupDirectory};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct GroupSearchService {
    gateway: Arc<dyn ChatGateway>,
    directory: Arc<dyn GroupDirectory>,
    lookup_timeout: Duration,
}

impl GroupSearchService {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        directory: Arc<dyn GroupDirectory>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            directory,
            lookup_timeout,
        }
    }

    /// Never fails: lookup errors degrade to the fallback directory, or all of
    /// it when nothing there matches. Each row says where it came from via `source`.
    pub async fn search(&self, query: &str) -> Vec<GroupListing> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        match ChatQuery::classify(query) {
            ChatQuery::Explicit(chat) => {
                match resolve_with_timeout(self.gateway.as_ref(), &chat, self.lookup_timeout).await
                {
                    Ok(info) => {
                        info!(chat = %chat, title = %info.title, "live lookup succeeded");
                        vec![GroupListing::live(info)]
                    }
                    Err(e) => {
                        warn!(chat = %chat, error = %e, "live lookup failed; using fallback directory");
                        let matches = self.directory.search(query);
                        if matches.is_empty() {
                            self.directory.all()
                        } else {
                            matches
                        }
                    }
                }
            }
            ChatQuery::FreeText(text) => {
                info!(query = %text, "free-text search served from fallback directory");
                self.directory.search(&text)
            }
        }
    }
}

/// `resolve_chat` bounded by `timeout`; elapsed becomes `ChatLookupError::Timeout`.
pub(crate) async fn resolve_with_timeout(
    gateway: &dyn ChatGateway,
    chat: &ChatRef,
    timeout: Duration,
) -> Result<ChatInfo, ChatLookupError> {
    match tokio::time::timeout(timeout, gateway.resolve_chat(chat)).await {
        Ok(result) => result,
        Err(_) => Err(ChatLookupError::Timeout {
            chat: chat.to_string(),
        }),
    }
}
