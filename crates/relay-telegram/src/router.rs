use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use relay_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use relay_core::{
    batch::BatchOrchestrator,
    config::Config,
    conversation::{login::LoginFlow, Conversation},
    dispatch::ContentDispatcher,
    messaging::port::MessagingPort,
    ports::{AuthPort, SourceClient, UserClientConnector},
    progress::ProgressReporter,
    registry::SessionRegistry,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub conversation: Arc<Conversation>,
}

/// MTProto-side collaborators handed in by the binary.
pub struct Backends {
    pub bot_source: Arc<dyn SourceClient>,
    pub user_source: Option<Arc<dyn SourceClient>>,
    pub auth: Arc<dyn AuthPort>,
    pub connector: Arc<dyn UserClientConnector>,
}

pub async fn run_polling(cfg: Arc<Config>, backends: Backends) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "relay bot started"),
        Err(e) => warn!(error = %e, "get_me failed"),
    }
    info!(
        allowed_users = cfg.allowed_users.len(),
        user_session = backends.user_source.is_some(),
        temp_dir = %cfg.temp_dir.display(),
        "configuration loaded"
    );

    // Progress edits and per-item status edits are frequent; space them out before they
    // reach the Bot API. The adapter still retries a single RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let registry = Arc::new(SessionRegistry::new(backends.user_source));
    let progress = Arc::new(ProgressReporter::new(
        messenger.clone(),
        cfg.progress_bucket_width,
    ));
    let dispatcher = ContentDispatcher::new(
        messenger.clone(),
        registry.clone(),
        progress,
        cfg.temp_dir.clone(),
    );
    let orchestrator = BatchOrchestrator::new(
        messenger.clone(),
        registry.clone(),
        dispatcher,
        backends.bot_source,
    );
    let login = LoginFlow::new(
        messenger.clone(),
        registry.clone(),
        backends.auth,
        backends.connector,
        cfg.login_code_timeout,
    );
    let conversation = Arc::new(Conversation::new(
        messenger,
        registry.clone(),
        orchestrator,
        login,
        cfg.max_batch_size,
    ));

    let state = Arc::new(AppState {
        cfg,
        registry,
        conversation,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    // No per-chat distribution: /cancel must run while the same user's batch is in flight.
    // Ordering for dialogue text is enforced by the per-user locks in the registry.
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(|_| None::<std::convert::Infallible>)
        .build()
        .dispatch()
        .await;

    Ok(())
}
