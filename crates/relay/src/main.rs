use std::sync::Arc;

use tracing::{info, warn};

use relay_core::{config::Config, ports::SourceClient};
use relay_mtproto::{MtprotoAuth, MtprotoConnector, MtprotoSource};
use relay_telegram::router::{run_polling, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;

    let cfg = Arc::new(Config::load()?);

    let bot_source: Arc<dyn SourceClient> = Arc::new(
        MtprotoSource::connect_bot(cfg.api_id, &cfg.api_hash, &cfg.bot_token).await?,
    );

    // A stale session string only disables private links; /login can replace it at runtime.
    let user_source: Option<Arc<dyn SourceClient>> = match &cfg.session_string {
        Some(credential) => match MtprotoSource::connect_user(cfg.api_id, credential).await {
            Ok(source) => Some(Arc::new(source)),
            Err(e) => {
                warn!(error = %e, "SESSION_STRING could not be used; private links disabled");
                None
            }
        },
        None => {
            info!("no SESSION_STRING set; private links need /login");
            None
        }
    };

    let backends = Backends {
        bot_source,
        user_source,
        auth: Arc::new(MtprotoAuth::new(cfg.api_id, cfg.api_hash.clone())),
        connector: Arc::new(MtprotoConnector::new(cfg.api_id)),
    };

    run_polling(cfg, backends).await
}
