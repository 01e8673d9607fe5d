use std::time::Duration;

/// Core error type for the relay bot.
///
/// Adapter crates map their specific errors (teloxide, grammers) into this type so
/// the core can tell user-facing failures from retryable ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("no user session connected")]
    NotConnected,

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
