//! SQLite-backed stores via libsql. Implements SubscriptionStore and PostStore.
//!
//! One database file (data/telepilot.db). Delivery attempts live in their own
//! table keyed by (post_id, target), so recording the same target twice updates
//! one row instead of appending a duplicate. Status changes are conditional
//! updates on `status = 'pending'`, which keeps post status monotonic.

use crate::domain::{
    AttemptOutcome, ChatRef, DeliveryAttempt, DeliveryStats, DomainError, NewPost, PostStatus,
    ScheduledPost, SubscribeOutcome, SubscribeStatus, SubscribedChat,
};
use crate::ports::{PostStore, SubscriptionStore};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const SUBSCRIBED_CHATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS subscribed_chats (
    chat TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    member_count INTEGER,
    description TEXT NOT NULL DEFAULT '',
    avatar TEXT,
    subscribed_at INTEGER NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0
)"#;

const SCHEDULED_POSTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_posts (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    targets_json TEXT NOT NULL,
    scheduled_at INTEGER NOT NULL,
    optimal_timing INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    last_processed_at INTEGER,
    claimed_by TEXT,
    claim_expires_at INTEGER
)"#;
const POSTS_DUE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_posts_status_due ON scheduled_posts (status, scheduled_at)";

const DELIVERY_ATTEMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS delivery_attempts (
    post_id TEXT NOT NULL,
    target TEXT NOT NULL,
    outcome TEXT NOT NULL,
    retryable INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    tries INTEGER NOT NULL DEFAULT 1,
    sent_at INTEGER NOT NULL,
    PRIMARY KEY (post_id, target)
)"#;

const POST_COLUMNS: &str =
    "id, content, targets_json, scheduled_at, optimal_timing, status, created_at, last_processed_at";

/// A success row is never touched again; a failed row is overwritten and its
/// `tries` incremented.
const UPSERT_ATTEMPT: &str = r#"
INSERT INTO delivery_attempts (post_id, target, outcome, retryable, error, tries, sent_at)
VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
ON CONFLICT (post_id, target) DO UPDATE SET
    outcome = excluded.outcome,
    retryable = excluded.retryable,
    error = excluded.error,
    tries = delivery_attempts.tries + 1,
    sent_at = excluded.sent_at
WHERE delivery_attempts.outcome <> 'success'
"#;

/// Busy wait for writers on other connections (dispatcher vs. console).
const BUSY_TIMEOUT_PRAGMA: &str = "PRAGMA busy_timeout = 5000";

pub struct SqliteRepo {
    db: Database,
    db_path: PathBuf,
}

impl SqliteRepo {
    /// Connect to (or create) the database and ensure the schema exists.
    /// Call once at startup; the returned repo is safe to share via Arc.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(|e| DomainError::store("create data dir", e))?;
        let db_path = base.join("telepilot.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(|e| DomainError::store("open database", e))?;
        let conn = db
            .connect()
            .map_err(|e| DomainError::store("open database", e))?;

        // WAL: concurrent readers + one writer. PRAGMAs return a row, so drain them.
        drain_pragma(&conn, "PRAGMA journal_mode=WAL").await?;
        drain_pragma(&conn, "PRAGMA synchronous=NORMAL").await?;

        for ddl in [
            SUBSCRIBED_CHATS_TABLE,
            SCHEDULED_POSTS_TABLE,
            POSTS_DUE_INDEX,
            DELIVERY_ATTEMPTS_TABLE,
        ] {
            conn.execute(ddl, ())
                .await
                .map_err(|e| DomainError::store("create schema", e))?;
        }

        info!(path = %db_path.display(), "SQLite connected with WAL mode");

        Ok(Self { db, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn conn(&self) -> Result<Connection, DomainError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DomainError::store("connect", e))?;
        drain_pragma(&conn, BUSY_TIMEOUT_PRAGMA).await?;
        Ok(conn)
    }

    async fn post_status(
        conn: &Connection,
        post_id: &str,
    ) -> Result<Option<PostStatus>, DomainError> {
        let mut rows = conn
            .query(
                "SELECT status FROM scheduled_posts WHERE id = ?1",
                params![post_id],
            )
            .await
            .map_err(|e| DomainError::store("read post status", e))?;
        match rows
            .next()
            .await
            .map_err(|e| DomainError::store("read post status", e))?
        {
            Some(row) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| DomainError::store("read post status", e))?;
                Ok(Some(status.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn claim_holder(conn: &Connection, post_id: &str) -> Result<Option<String>, DomainError> {
        let mut rows = conn
            .query(
                "SELECT claimed_by FROM scheduled_posts WHERE id = ?1",
                params![post_id],
            )
            .await
            .map_err(|e| DomainError::store("read claim", e))?;
        match rows
            .next()
            .await
            .map_err(|e| DomainError::store("read claim", e))?
        {
            Some(row) => Ok(row.get::<String>(0).ok()),
            None => Ok(None),
        }
    }

    /// Run a post query, then attach each post's attempts.
    async fn query_posts(
        &self,
        conn: &Connection,
        op: &'static str,
        mut rows: libsql::Rows,
    ) -> Result<Vec<ScheduledPost>, DomainError> {
        let mut posts = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DomainError::store(op, e))? {
            posts.push(post_from_row(&row, op)?);
        }
        for post in &mut posts {
            post.attempts = Self::load_attempts(conn, post).await?;
        }
        Ok(posts)
    }

    async fn load_attempts(
        conn: &Connection,
        post: &ScheduledPost,
    ) -> Result<Vec<DeliveryAttempt>, DomainError> {
        let mut rows = conn
            .query(
                "SELECT target, outcome, retryable, error, tries, sent_at FROM delivery_attempts WHERE post_id = ?1",
                params![post.id.as_str()],
            )
            .await
            .map_err(|e| DomainError::store("load attempts", e))?;
        let mut attempts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::store("load attempts", e))?
        {
            attempts.push(attempt_from_row(&row)?);
        }
        attempts.sort_by_key(|a| {
            post.targets
                .iter()
                .position(|t| t == &a.target)
                .unwrap_or(usize::MAX)
        });
        Ok(attempts)
    }
}

async fn drain_pragma(conn: &Connection, sql: &str) -> Result<(), DomainError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DomainError::store("pragma", e))?;
    while rows
        .next()
        .await
        .map_err(|e| DomainError::store("pragma", e))?
        .is_some()
    {}
    Ok(())
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DomainError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| DomainError::store("decode timestamp", format!("out of range: {}", ms)))
}

fn post_from_row(row: &Row, op: &'static str) -> Result<ScheduledPost, DomainError> {
    let id: String = row.get(0).map_err(|e| DomainError::store(op, e))?;
    let content: String = row.get(1).map_err(|e| DomainError::store(op, e))?;
    let targets_json: String = row.get(2).map_err(|e| DomainError::store(op, e))?;
    let scheduled_at: i64 = row.get(3).map_err(|e| DomainError::store(op, e))?;
    let optimal_timing: i64 = row.get(4).map_err(|e| DomainError::store(op, e))?;
    let status: String = row.get(5).map_err(|e| DomainError::store(op, e))?;
    let created_at: i64 = row.get(6).map_err(|e| DomainError::store(op, e))?;
    let last_processed_at: Option<i64> = row.get(7).ok();

    let targets: Vec<ChatRef> =
        serde_json::from_str(&targets_json).map_err(|e| DomainError::store(op, e))?;

    Ok(ScheduledPost {
        id,
        content,
        targets,
        scheduled_at: from_millis(scheduled_at)?,
        optimal_timing: optimal_timing != 0,
        status: status.parse()?,
        created_at: from_millis(created_at)?,
        last_processed_at: last_processed_at.map(from_millis).transpose()?,
        attempts: Vec::new(),
    })
}

fn attempt_from_row(row: &Row) -> Result<DeliveryAttempt, DomainError> {
    const OP: &str = "decode attempt";
    let target: String = row.get(0).map_err(|e| DomainError::store(OP, e))?;
    let outcome: String = row.get(1).map_err(|e| DomainError::store(OP, e))?;
    let retryable: i64 = row.get(2).map_err(|e| DomainError::store(OP, e))?;
    let error: Option<String> = row.get(3).ok();
    let tries: i64 = row.get(4).map_err(|e| DomainError::store(OP, e))?;
    let sent_at: i64 = row.get(5).map_err(|e| DomainError::store(OP, e))?;

    Ok(DeliveryAttempt {
        target: target.parse().map_err(|e| DomainError::store(OP, e))?,
        outcome: if outcome == AttemptOutcome::Success.as_str() {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failed
        },
        retryable: retryable != 0,
        error,
        tries: u32::try_from(tries).unwrap_or(u32::MAX),
        sent_at: from_millis(sent_at)?,
    })
}

fn subscription_from_row(row: &Row) -> Result<SubscribedChat, DomainError> {
    const OP: &str = "decode subscription";
    let chat: String = row.get(0).map_err(|e| DomainError::store(OP, e))?;
    let title: String = row.get(1).map_err(|e| DomainError::store(OP, e))?;
    let member_count: Option<i64> = row.get(2).ok();
    let description: String = row.get::<String>(3).unwrap_or_default();
    let avatar: Option<String> = row.get(4).ok();
    let subscribed_at: i64 = row.get(5).map_err(|e| DomainError::store(OP, e))?;
    let verified: i64 = row.get(6).map_err(|e| DomainError::store(OP, e))?;

    Ok(SubscribedChat {
        chat: chat.parse().map_err(|e| DomainError::store(OP, e))?,
        title,
        member_count: member_count.and_then(|n| u64::try_from(n).ok()),
        description,
        avatar,
        subscribed_at: from_millis(subscribed_at)?,
        verified: verified != 0,
    })
}

#[async_trait::async_trait]
impl SubscriptionStore for SqliteRepo {
    async fn subscribe(&self, chat: &SubscribedChat) -> Result<SubscribeOutcome, DomainError> {
        let conn = self.conn().await?;
        let key = chat.chat.to_string();
        let changed = conn
            .execute(
                r#"
                INSERT INTO subscribed_chats (chat, title, member_count, description, avatar, subscribed_at, verified)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (chat) DO NOTHING
                "#,
                params![
                    key.as_str(),
                    chat.title.as_str(),
                    chat.member_count.and_then(|n| i64::try_from(n).ok()),
                    chat.description.as_str(),
                    chat.avatar.clone(),
                    millis(chat.subscribed_at),
                    i64::from(chat.verified)
                ],
            )
            .await
            .map_err(|e| DomainError::store("subscribe", e))?;

        let status = if changed == 1 {
            info!(chat = %key, verified = chat.verified, "chat subscribed");
            SubscribeStatus::Created
        } else {
            debug!(chat = %key, "chat already subscribed");
            SubscribeStatus::AlreadyPresent
        };
        Ok(SubscribeOutcome {
            status,
            verified: chat.verified,
        })
    }

    async fn unsubscribe(&self, chat: &ChatRef) -> Result<(), DomainError> {
        let conn = self.conn().await?;
        let key = chat.to_string();
        let changed = conn
            .execute(
                "DELETE FROM subscribed_chats WHERE chat = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| DomainError::store("unsubscribe", e))?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!(
                "chat {} is not subscribed",
                key
            )));
        }
        info!(chat = %key, "chat unsubscribed");
        Ok(())
    }

    async fn list_subscribed_ids(&self) -> Result<Vec<ChatRef>, DomainError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query("SELECT chat FROM subscribed_chats", ())
            .await
            .map_err(|e| DomainError::store("list subscribed ids", e))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::store("list subscribed ids", e))?
        {
            let chat: String = row
                .get(0)
                .map_err(|e| DomainError::store("list subscribed ids", e))?;
            ids.push(
                chat.parse()
                    .map_err(|e| DomainError::store("list subscribed ids", e))?,
            );
        }
        Ok(ids)
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscribedChat>, DomainError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT chat, title, member_count, description, avatar, subscribed_at, verified
                FROM subscribed_chats
                ORDER BY subscribed_at ASC
                "#,
                (),
            )
            .await
            .map_err(|e| DomainError::store("list subscriptions", e))?;
        let mut chats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::store("list subscriptions", e))?
        {
            chats.push(subscription_from_row(&row)?);
        }
        Ok(chats)
    }
}

#[async_trait::async_trait]
impl PostStore for SqliteRepo {
    async fn create(
        &self,
        post: &NewPost,
        now: DateTime<Utc>,
    ) -> Result<ScheduledPost, DomainError> {
        post.validate()?;
        let id = Uuid::new_v4().to_string();
        let targets_json =
            serde_json::to_string(&post.targets).map_err(|e| DomainError::store("create post", e))?;
        let created_at = from_millis(millis(now))?;
        let scheduled_at = from_millis(millis(post.scheduled_at))?;

        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO scheduled_posts (id, content, targets_json, scheduled_at, optimal_timing, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)
            "#,
            params![
                id.as_str(),
                post.content.as_str(),
                targets_json.as_str(),
                millis(scheduled_at),
                i64::from(post.optimal_timing),
                millis(created_at)
            ],
        )
        .await
        .map_err(|e| DomainError::store("create post", e))?;

        info!(
            post_id = %id,
            targets = post.targets.len(),
            scheduled_at = %scheduled_at,
            "post scheduled"
        );

        Ok(ScheduledPost {
            id,
            content: post.content.clone(),
            targets: post.targets.clone(),
            scheduled_at,
            optimal_timing: post.optimal_timing,
            status: PostStatus::Pending,
            created_at,
            last_processed_at: None,
            attempts: Vec::new(),
        })
    }

    async fn get(&self, post_id: &str) -> Result<ScheduledPost, DomainError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {} FROM scheduled_posts WHERE id = ?1", POST_COLUMNS),
                params![post_id],
            )
            .await
            .map_err(|e| DomainError::store("get post", e))?;
        self.query_posts(&conn, "get post", rows)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::NotFound(format!("post {}", post_id)))
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ScheduledPost>, DomainError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM scheduled_posts ORDER BY scheduled_at DESC LIMIT ?1",
                    POST_COLUMNS
                ),
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| DomainError::store("list recent posts", e))?;
        self.query_posts(&conn, "list recent posts", rows).await
    }

    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<ScheduledPost>, DomainError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM scheduled_posts WHERE status = 'pending' AND scheduled_at <= ?1 ORDER BY scheduled_at ASC",
                    POST_COLUMNS
                ),
                params![millis(as_of)],
            )
            .await
            .map_err(|e| DomainError::store("list due posts", e))?;
        self.query_posts(&conn, "list due posts", rows).await
    }

    async fn claim(
        &self,
        post_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                r#"
                UPDATE scheduled_posts
                SET claimed_by = ?2, claim_expires_at = ?3
                WHERE id = ?1
                  AND status = 'pending'
                  AND (claimed_by IS NULL OR claimed_by = ?2 OR claim_expires_at < ?4)
                "#,
                params![post_id, owner, millis(lease_until), millis(now)],
            )
            .await
            .map_err(|e| DomainError::store("claim post", e))?;
        Ok(changed == 1)
    }

    async fn record_attempt(
        &self,
        post_id: &str,
        attempt: &DeliveryAttempt,
    ) -> Result<DeliveryAttempt, DomainError> {
        let conn = self.conn().await?;
        match Self::post_status(&conn, post_id).await? {
            None => return Err(DomainError::NotFound(format!("post {}", post_id))),
            Some(PostStatus::Pending) => {}
            Some(status) => {
                return Err(DomainError::PostClosed {
                    post_id: post_id.to_string(),
                    status,
                });
            }
        }
        let target = attempt.target.to_string();
        conn.execute(
            UPSERT_ATTEMPT,
            params![
                post_id,
                target.as_str(),
                attempt.outcome.as_str(),
                i64::from(attempt.retryable),
                attempt.error.clone(),
                millis(attempt.sent_at)
            ],
        )
        .await
        .map_err(|e| DomainError::store("record attempt", e))?;

        let mut rows = conn
            .query(
                "SELECT target, outcome, retryable, error, tries, sent_at FROM delivery_attempts WHERE post_id = ?1 AND target = ?2",
                params![post_id, target.as_str()],
            )
            .await
            .map_err(|e| DomainError::store("record attempt", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DomainError::store("record attempt", e))?
            .ok_or_else(|| DomainError::store("record attempt", "row missing after upsert"))?;
        attempt_from_row(&row)
    }

    async fn finalize_status(
        &self,
        post_id: &str,
        owner: &str,
        status: PostStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let conn = self.conn().await?;
        let updated = if status == PostStatus::Pending {
            conn.execute(
                r#"
                UPDATE scheduled_posts
                SET last_processed_at = ?2, claimed_by = NULL, claim_expires_at = NULL
                WHERE id = ?1 AND status = 'pending'
                  AND (claimed_by IS NULL OR claimed_by = ?3)
                "#,
                params![post_id, millis(processed_at), owner],
            )
            .await
        } else {
            conn.execute(
                r#"
                UPDATE scheduled_posts
                SET status = ?2, last_processed_at = ?3, claimed_by = NULL, claim_expires_at = NULL
                WHERE id = ?1 AND status = 'pending'
                  AND (claimed_by IS NULL OR claimed_by = ?4)
                "#,
                params![post_id, status.as_str(), millis(processed_at), owner],
            )
            .await
        };
        let changed = updated.map_err(|e| DomainError::store("finalize status", e))?;

        if changed == 1 {
            debug!(post_id, owner, status = %status, "post status updated");
            return Ok(());
        }
        match Self::post_status(&conn, post_id).await? {
            None => Err(DomainError::NotFound(format!("post {}", post_id))),
            Some(PostStatus::Pending) => {
                let holder = Self::claim_holder(&conn, post_id).await?;
                debug!(post_id, owner, holder = ?holder, "finalize refused; lease held elsewhere");
                Err(DomainError::ClaimLost {
                    post_id: post_id.to_string(),
                    owner: owner.to_string(),
                })
            }
            Some(from) => Err(DomainError::InvalidTransition {
                post_id: post_id.to_string(),
                from,
                to: status,
            }),
        }
    }

    async fn cancel(&self, post_id: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                r#"
                UPDATE scheduled_posts
                SET status = 'cancelled', last_processed_at = ?2
                WHERE id = ?1
                  AND status = 'pending'
                  AND (claimed_by IS NULL OR claim_expires_at < ?2)
                "#,
                params![post_id, millis(now)],
            )
            .await
            .map_err(|e| DomainError::store("cancel post", e))?;

        if changed == 1 {
            info!(post_id, "post cancelled");
            return Ok(());
        }
        match Self::post_status(&conn, post_id).await? {
            None => Err(DomainError::NotFound(format!("post {}", post_id))),
            // Pending here means a dispatcher holds the lease right now.
            Some(from) => Err(DomainError::InvalidTransition {
                post_id: post_id.to_string(),
                from,
                to: PostStatus::Cancelled,
            }),
        }
    }

    async fn delivery_stats(&self) -> Result<Vec<DeliveryStats>, DomainError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT target,
                       SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END),
                       SUM(CASE WHEN outcome = 'success' THEN 0 ELSE 1 END)
                FROM delivery_attempts
                GROUP BY target
                ORDER BY target
                "#,
                (),
            )
            .await
            .map_err(|e| DomainError::store("delivery stats", e))?;
        let mut stats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::store("delivery stats", e))?
        {
            let target: String = row
                .get(0)
                .map_err(|e| DomainError::store("delivery stats", e))?;
            let delivered: i64 = row
                .get(1)
                .map_err(|e| DomainError::store("delivery stats", e))?;
            let failed: i64 = row
                .get(2)
                .map_err(|e| DomainError::store("delivery stats", e))?;
            stats.push(DeliveryStats {
                target: target
                    .parse()
                    .map_err(|e| DomainError::store("delivery stats", e))?,
                delivered: u64::try_from(delivered).unwrap_or(0),
                failed: u64::try_from(failed).unwrap_or(0),
            });
        }
        Ok(stats)
    }
}
