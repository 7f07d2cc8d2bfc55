//! Wiring & DI. Entry point: bootstrap adapters, inject into services, run UI or daemon.
//! No business logic here.

use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use telepilot::adapters::ai::{MockSuggestionAdapter, OpenAiAdapter};
use telepilot::adapters::directory::StaticGroupDirectory;
use telepilot::adapters::persistence::SqliteRepo;
use telepilot::adapters::telegram::BotApiGateway;
use telepilot::adapters::ui::tui::TuiInputPort;
use telepilot::ports::{
    ChatGateway, GroupDirectory, InputPort, PostStore, SubscriptionStore, SuggestionPort,
};
use telepilot::shared::config::AppConfig;
use telepilot::usecases::{
    Dispatcher, DispatcherSettings, GroupSearchService, SchedulerService, SubscriptionService,
    SuggestionService,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let daemon = std::env::args().skip(1).any(|a| a == "--daemon");
    if !daemon {
        telepilot::adapters::ui::init_ui();
    }

    let cfg = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "config could not be loaded; using defaults");
        AppConfig::default()
    });

    let data_path = cfg.data_dir_or_default();
    let data_dir_abs = data_path
        .canonicalize()
        .unwrap_or_else(|_| data_path.clone());
    info!(path = %data_dir_abs.display(), "data directory");

    // --- Telegram Bot API (explicit config, no global client) ---
    let bot_config = cfg
        .bot_api_config()
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let gateway: Arc<dyn ChatGateway> = Arc::new(
        BotApiGateway::new(bot_config).map_err(|e| anyhow::anyhow!("{}", e))?,
    );

    // --- Storage: one SQLite file for subscriptions, posts and attempts ---
    let sqlite_repo = Arc::new(
        SqliteRepo::connect(&data_path)
            .await
            .map_err(|e| anyhow::anyhow!("SQLite connect failed: {}", e))?,
    );
    let subscriptions: Arc<dyn SubscriptionStore> =
        Arc::clone(&sqlite_repo) as Arc<dyn SubscriptionStore>;
    let posts: Arc<dyn PostStore> = Arc::clone(&sqlite_repo) as Arc<dyn PostStore>;

    // --- Dispatcher ---
    let settings = DispatcherSettings {
        concurrency: cfg.dispatch_concurrency_or_default(),
        max_tries: cfg.max_delivery_tries_or_default(),
        lease: cfg.claim_lease(),
        send_timeout: cfg.request_timeout() + std::time::Duration::from_secs(5),
    };
    info!(
        concurrency = settings.concurrency,
        max_tries = settings.max_tries,
        lease_secs = settings.lease.as_secs(),
        "dispatcher settings"
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&gateway),
        Arc::clone(&posts),
        settings,
    ));

    if daemon {
        let interval = cfg.dispatch_interval();
        info!(interval_secs = interval.as_secs(), "daemon mode; press Ctrl-C to stop");
        tokio::select! {
            _ = dispatcher.run_loop(interval) => {}
            _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        }
        return Ok(());
    }

    // --- Suggestion backend ---
    let suggestion_backend: Arc<dyn SuggestionPort> = if cfg.is_ai_configured() {
        info!(
            model = %cfg.ai_model_or_default(),
            url = %cfg.ai_api_url_or_default(),
            "post suggestions enabled with OpenAI adapter"
        );
        Arc::new(OpenAiAdapter::new(
            cfg.ai_api_url_or_default(),
            cfg.ai_api_key().unwrap_or_default(),
            cfg.ai_model_or_default(),
        ))
    } else {
        warn!("TELEPILOT_AI_API_KEY not set, using mock suggestion adapter");
        Arc::new(MockSuggestionAdapter::new())
    };

    // --- Services ---
    let directory: Arc<dyn GroupDirectory> = Arc::new(StaticGroupDirectory::sample());
    let lookup_timeout = cfg.request_timeout();
    let search = Arc::new(GroupSearchService::new(
        Arc::clone(&gateway),
        Arc::clone(&directory),
        lookup_timeout,
    ));
    let subscription_service = Arc::new(SubscriptionService::new(
        Arc::clone(&gateway),
        Arc::clone(&directory),
        Arc::clone(&subscriptions),
        lookup_timeout,
    ));
    let scheduler = Arc::new(SchedulerService::new(
        Arc::clone(&posts),
        Arc::clone(&subscriptions),
    ));
    let suggestions = Arc::new(SuggestionService::new(suggestion_backend, cfg.ai_timeout()));

    let input_port: Arc<dyn InputPort> = Arc::new(TuiInputPort::new(
        search,
        subscription_service,
        scheduler,
        suggestions,
        Arc::clone(&dispatcher),
        data_path.join("reports"),
    ));

    input_port
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
