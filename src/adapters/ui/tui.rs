//! Implements InputPort. Inquire-based operator console.
//!
//! Every menu action calls one use case and prints the outcome. Errors from an
//! action are shown and the menu comes back; Esc or Ctrl-C on the main menu exits.

use crate::adapters::ui::progress::with_spinner;
use crate::domain::{
    ChatRef, DomainError, GroupListing, ListingSource, NewPost, PostStatus, ScheduledPost,
    SubscribeStatus, SubscribedChat, MAX_MESSAGE_CHARS,
};
use crate::ports::InputPort;
use crate::usecases::{
    Dispatcher, GroupSearchService, SchedulerService, SubscriptionService, SuggestionService,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use inquire::error::InquireError;
use inquire::ui::{Color, RenderConfig, StyleSheet, Styled};
use inquire::validator::Validation;
use inquire::{Confirm, MultiSelect, Select, Text};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

const RECENT_POSTS: u32 = 20;
const REPORT_POSTS: u32 = 500;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Neon prompt theme for every inquire prompt. Call once before the first prompt.
pub fn apply_theme() {
    let accent = Color::Rgb {
        r: 0x22,
        g: 0x9e,
        b: 0xd9,
    };
    let config = RenderConfig::default()
        .with_prompt_prefix(Styled::new("›").with_fg(accent))
        .with_highlighted_option_prefix(Styled::new("➤").with_fg(accent))
        .with_selected_checkbox(Styled::new("[x]").with_fg(accent))
        .with_help_message(StyleSheet::new().with_fg(Color::DarkGrey));
    inquire::set_global_render_config(config);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    SearchGroups,
    Join,
    Leave,
    ListSubscriptions,
    SchedulePost,
    Suggest,
    RecentPosts,
    CancelPost,
    RunDispatcher,
    Analytics,
    ExportReport,
    Exit,
}

impl MenuAction {
    const ALL: [MenuAction; 12] = [
        MenuAction::SearchGroups,
        MenuAction::Join,
        MenuAction::Leave,
        MenuAction::ListSubscriptions,
        MenuAction::SchedulePost,
        MenuAction::Suggest,
        MenuAction::RecentPosts,
        MenuAction::CancelPost,
        MenuAction::RunDispatcher,
        MenuAction::Analytics,
        MenuAction::ExportReport,
        MenuAction::Exit,
    ];
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MenuAction::SearchGroups => "Search groups",
            MenuAction::Join => "Join a group or channel",
            MenuAction::Leave => "Leave a group or channel",
            MenuAction::ListSubscriptions => "List subscriptions",
            MenuAction::SchedulePost => "Schedule a post",
            MenuAction::Suggest => "Get a post suggestion",
            MenuAction::RecentPosts => "Recent posts",
            MenuAction::CancelPost => "Cancel a pending post",
            MenuAction::RunDispatcher => "Run dispatcher now",
            MenuAction::Analytics => "Delivery analytics",
            MenuAction::ExportReport => "Export delivery report (CSV)",
            MenuAction::Exit => "Exit",
        })
    }
}

fn input_err(e: InquireError) -> DomainError {
    DomainError::Input(e.to_string())
}

fn source_label(source: ListingSource) -> &'static str {
    match source {
        ListingSource::Live => "[live]",
        ListingSource::Fallback => "[sample]",
    }
}

fn format_members(count: Option<u64>) -> String {
    count
        .map(|n| format!("{} members", n))
        .unwrap_or_else(|| "members unknown".to_string())
}

fn format_listing(g: &GroupListing) -> String {
    format!(
        "{} {} ({}) · {}",
        source_label(g.source),
        g.title,
        g.chat,
        format_members(g.member_count)
    )
}

fn format_subscription(s: &SubscribedChat) -> String {
    format!(
        "{} ({}) · {}{}",
        s.title,
        s.chat,
        format_members(s.member_count),
        if s.verified { "" } else { " · unverified" }
    )
}

fn format_post(p: &ScheduledPost) -> String {
    let preview: String = p.content.chars().take(40).collect();
    let ellipsis = if p.content.chars().count() > 40 { "…" } else { "" };
    format!(
        "{} [{}] {} → {} target(s) · \"{}{}\"",
        p.scheduled_at.format(TIME_FORMAT),
        p.status,
        &p.id[..p.id.len().min(8)],
        p.targets.len(),
        preview.replace('\n', " "),
        ellipsis
    )
}

/// Empty input means "now". Otherwise `YYYY-MM-DD HH:MM`, read as UTC.
fn parse_schedule_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(now);
    }
    NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| "expected YYYY-MM-DD HH:MM (UTC), e.g. 2026-05-01 18:30".to_string())
}

fn parse_targets(input: &str) -> Result<Vec<ChatRef>, String> {
    input
        .split([',', ' '])
        .filter(|s| !s.trim().is_empty())
        .map(|s| ChatRef::parse(s).ok_or_else(|| format!("'{}' is not an @handle or numeric id", s.trim())))
        .collect()
}

/// TUI adapter. Inquire prompts over the application services.
pub struct TuiInputPort {
    search: Arc<GroupSearchService>,
    subscriptions: Arc<SubscriptionService>,
    scheduler: Arc<SchedulerService>,
    suggestions: Arc<SuggestionService>,
    dispatcher: Arc<Dispatcher>,
    reports_dir: PathBuf,
}

impl TuiInputPort {
    pub fn new(
        search: Arc<GroupSearchService>,
        subscriptions: Arc<SubscriptionService>,
        scheduler: Arc<SchedulerService>,
        suggestions: Arc<SuggestionService>,
        dispatcher: Arc<Dispatcher>,
        reports_dir: PathBuf,
    ) -> Self {
        Self {
            search,
            subscriptions,
            scheduler,
            suggestions,
            dispatcher,
            reports_dir,
        }
    }

    async fn handle(&self, action: MenuAction) -> Result<(), DomainError> {
        match action {
            MenuAction::SearchGroups => self.search_groups().await,
            MenuAction::Join => self.join().await,
            MenuAction::Leave => self.leave().await,
            MenuAction::ListSubscriptions => self.list_subscriptions().await,
            MenuAction::SchedulePost => self.schedule_post().await,
            MenuAction::Suggest => self.suggest().await,
            MenuAction::RecentPosts => self.recent_posts().await,
            MenuAction::CancelPost => self.cancel_post().await,
            MenuAction::RunDispatcher => self.run_dispatcher().await,
            MenuAction::Analytics => self.analytics().await,
            MenuAction::ExportReport => self.export_report().await,
            MenuAction::Exit => Ok(()),
        }
    }

    async fn search_groups(&self) -> Result<(), DomainError> {
        let query = Text::new("Search:")
            .with_help_message("@handle or numeric id for a live lookup; anything else searches the sample directory")
            .prompt()
            .map_err(input_err)?;
        let results = with_spinner("Searching…", self.search.search(&query)).await;
        if results.is_empty() {
            println!("No groups found.");
            return Ok(());
        }
        if results.iter().any(|g| g.source == ListingSource::Fallback) {
            println!("Live search unavailable for this query; showing sample data.");
        }
        for g in &results {
            println!("  {}", format_listing(g));
            if !g.description.is_empty() {
                println!("      {}", g.description);
            }
        }
        Ok(())
    }

    async fn join(&self) -> Result<(), DomainError> {
        let query = Text::new("Chat to join (@handle or numeric id):")
            .prompt()
            .map_err(input_err)?;
        let outcome = with_spinner("Verifying chat…", self.subscriptions.join(&query)).await?;
        let verified = if outcome.verified {
            "verified"
        } else {
            "not verified, saved from sample data"
        };
        match outcome.status {
            SubscribeStatus::Created => println!("✓ Subscribed ({}).", verified),
            SubscribeStatus::AlreadyPresent => println!("Already subscribed."),
        }
        Ok(())
    }

    async fn leave(&self) -> Result<(), DomainError> {
        let subs = self.subscriptions.list().await?;
        if subs.is_empty() {
            println!("No subscriptions.");
            return Ok(());
        }
        let options: Vec<String> = subs.iter().map(format_subscription).collect();
        let picked = Select::new("Leave which chat?", options.clone())
            .prompt()
            .map_err(input_err)?;
        if let Some(sub) = options
            .iter()
            .position(|o| o == &picked)
            .and_then(|i| subs.get(i))
        {
            self.subscriptions.leave(&sub.chat).await?;
            println!("✓ Left {}.", sub.title);
        }
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<(), DomainError> {
        let subs = self.subscriptions.list().await?;
        if subs.is_empty() {
            println!("No subscriptions.");
        }
        for s in &subs {
            println!("  {}", format_subscription(s));
        }
        Ok(())
    }

    async fn pick_targets(&self) -> Result<Vec<ChatRef>, DomainError> {
        let subs = self.subscriptions.list().await?;
        if subs.is_empty() {
            let raw = Text::new("Targets (comma-separated @handles or ids):")
                .prompt()
                .map_err(input_err)?;
            return parse_targets(&raw).map_err(DomainError::Validation);
        }
        let options: Vec<String> = subs.iter().map(format_subscription).collect();
        let picked = MultiSelect::new("Send to:", options.clone())
            .prompt()
            .map_err(input_err)?;
        Ok(subs
            .iter()
            .zip(options.iter())
            .filter(|(_, o)| picked.contains(o))
            .map(|(s, _)| s.chat.clone())
            .collect())
    }

    async fn schedule_post(&self) -> Result<(), DomainError> {
        let content = Text::new("Message:")
            .with_validator(|s: &str| {
                let n = s.chars().count();
                Ok(if s.trim().is_empty() {
                    Validation::Invalid("Message must not be empty".into())
                } else if n > MAX_MESSAGE_CHARS {
                    Validation::Invalid(
                        format!("{} characters; the limit is {}", n, MAX_MESSAGE_CHARS).into(),
                    )
                } else {
                    Validation::Valid
                })
            })
            .prompt()
            .map_err(input_err)?;
        let targets = self.pick_targets().await?;
        let when = Text::new("Send at (UTC, YYYY-MM-DD HH:MM; empty = now):")
            .with_validator(|s: &str| {
                Ok(match parse_schedule_time(s, Utc::now()) {
                    Ok(_) => Validation::Valid,
                    Err(msg) => Validation::Invalid(msg.into()),
                })
            })
            .prompt()
            .map_err(input_err)?;
        let scheduled_at = parse_schedule_time(&when, Utc::now()).map_err(DomainError::Validation)?;
        let optimal_timing = Confirm::new("Request AI-optimised timing?")
            .with_default(false)
            .prompt()
            .map_err(input_err)?;

        let post = self
            .scheduler
            .schedule(NewPost {
                content,
                targets,
                scheduled_at,
                optimal_timing,
            })
            .await?;
        println!(
            "✓ Scheduled {} for {} to {} target(s).",
            post.id,
            post.scheduled_at.format(TIME_FORMAT),
            post.targets.len()
        );
        Ok(())
    }

    async fn suggest(&self) -> Result<(), DomainError> {
        let content = Text::new("Draft message:").prompt().map_err(input_err)?;
        let audience = Text::new("Audience (optional):")
            .with_help_message("e.g. tech enthusiasts group, news channel")
            .prompt()
            .map_err(input_err)?;
        let suggestion = with_spinner(
            "Asking for a suggestion…",
            self.suggestions.suggest(&content, &audience),
        )
        .await?;
        println!("\n💡 {}\n", suggestion.suggestion);
        Ok(())
    }

    async fn recent_posts(&self) -> Result<(), DomainError> {
        let posts = self.scheduler.list_recent(RECENT_POSTS).await?;
        if posts.is_empty() {
            println!("No posts yet.");
        }
        for p in &posts {
            println!("  {}", format_post(p));
            for a in &p.attempts {
                println!(
                    "      {} {} (tries: {}){}",
                    a.target,
                    a.outcome.as_str(),
                    a.tries,
                    a.error
                        .as_deref()
                        .map(|e| format!(" · {}", e))
                        .unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    async fn cancel_post(&self) -> Result<(), DomainError> {
        let pending: Vec<ScheduledPost> = self
            .scheduler
            .list_recent(REPORT_POSTS)
            .await?
            .into_iter()
            .filter(|p| p.status == PostStatus::Pending)
            .collect();
        if pending.is_empty() {
            println!("No pending posts.");
            return Ok(());
        }
        let options: Vec<String> = pending.iter().map(format_post).collect();
        let picked = Select::new("Cancel which post?", options.clone())
            .prompt()
            .map_err(input_err)?;
        if let Some(post) = options
            .iter()
            .position(|o| o == &picked)
            .and_then(|i| pending.get(i))
        {
            self.scheduler.cancel(&post.id).await?;
            println!("✓ Cancelled {}.", post.id);
        }
        Ok(())
    }

    async fn run_dispatcher(&self) -> Result<(), DomainError> {
        let report = with_spinner("Dispatching due posts…", self.dispatcher.run_once(Utc::now())).await?;
        if report.is_empty() {
            println!("Nothing due.");
            return Ok(());
        }
        for p in &report.posts {
            println!(
                "  {} → {} (delivered {}, failed {}, retrying {})",
                p.post_id, p.status, p.delivered, p.failed, p.retrying
            );
        }
        if report.skipped > 0 {
            println!("  {} post(s) skipped: claimed by another dispatcher.", report.skipped);
        }
        for (post_id, err) in &report.errors {
            println!("  ✗ {}: {}", post_id, err);
        }
        Ok(())
    }

    async fn analytics(&self) -> Result<(), DomainError> {
        let stats = self.scheduler.delivery_stats().await?;
        if stats.is_empty() {
            println!("No deliveries recorded yet.");
        }
        for s in &stats {
            println!("  {:<36} delivered {:>5}  failed {:>5}", s.target, s.delivered, s.failed);
        }
        Ok(())
    }

    async fn export_report(&self) -> Result<(), DomainError> {
        let path = self
            .scheduler
            .export_report(&self.reports_dir, REPORT_POSTS)
            .await?;
        println!("✓ Report written to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl InputPort for TuiInputPort {
    async fn run(&self) -> Result<(), DomainError> {
        loop {
            let action = match Select::new("What do you want to do?", MenuAction::ALL.to_vec())
                .with_page_size(MenuAction::ALL.len())
                .prompt()
            {
                Ok(action) => action,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                    return Ok(());
                }
                Err(e) => return Err(input_err(e)),
            };
            if action == MenuAction::Exit {
                return Ok(());
            }
            match self.handle(action).await {
                Ok(()) => {}
                Err(DomainError::Input(_)) => println!("Cancelled."),
                Err(e) => println!("✗ {}", e),
            }
        }
    }
}
