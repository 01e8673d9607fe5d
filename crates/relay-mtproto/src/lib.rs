//! MTProto adapter (grammers).
//!
//! The Bot API cannot read arbitrary messages by id or download files from chats the
//! bot only knows by link, so `relay-core` reads sources through these clients: one
//! signed in as the bot, one (optional) signed in as the operator's user account.

use std::{sync::Arc, time::Duration};

use base64::Engine;
use grammers_client::{session::storages::TlSession, Client, InvocationError};
use grammers_mtsender::SenderPool;
use tokio::task::JoinHandle;
use tracing::warn;

use relay_core::errors::Error;

pub mod auth;
pub mod convert;
pub mod source;

pub use auth::{MtprotoAuth, MtprotoConnector};
pub use source::MtprotoSource;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// Aborts the sender pool runner when the owning client goes away.
pub(crate) struct RunnerGuard {
    handle: JoinHandle<()>,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spin up a client over `session` and run its sender pool in the background.
pub(crate) fn start_client(session: Arc<TlSession>, api_id: i32) -> (Client, RunnerGuard) {
    let pool = SenderPool::new(Arc::clone(&session), api_id);
    let client = Client::new(&pool);
    let SenderPool { runner, .. } = pool;
    let handle = tokio::spawn(async move {
        runner.run().await;
        warn!("mtproto sender pool runner exited");
    });
    (client, RunnerGuard { handle })
}

pub(crate) fn load_session(credential: &str) -> Result<TlSession, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(credential.trim().as_bytes())
        .map_err(|e| Error::Auth(format!("invalid session string: {e}")))?;
    TlSession::load(&bytes).map_err(|e| Error::Auth(format!("session load failed: {e}")))
}

pub(crate) fn export_session(session: &TlSession) -> String {
    base64::engine::general_purpose::STANDARD.encode(session.save())
}

/// Await `fut` for at most [`REQUEST_TIMEOUT`], mapping both failure modes to core errors.
pub(crate) async fn call<T>(
    what: &str,
    fut: impl std::future::Future<Output = Result<T, InvocationError>>,
) -> Result<T, Error> {
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(map_invocation(what, e)),
        Err(_) => Err(Error::External(format!(
            "{what} timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))),
    }
}

/// Like [`call`] for requests whose error is not a plain RPC error (login, authorization checks).
pub(crate) async fn timed<T, E: std::fmt::Display>(
    what: &str,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> Result<T, Error> {
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(Error::Auth(format!("{what} failed: {e}"))),
        Err(_) => Err(Error::External(format!(
            "{what} timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))),
    }
}

pub(crate) fn map_invocation(what: &str, e: InvocationError) -> Error {
    if let InvocationError::Rpc(rpc) = &e {
        if let Some(retry_after) = flood_wait(&rpc.name, rpc.value) {
            return Error::RateLimited { retry_after };
        }
    }
    Error::External(format!("{what} failed: {e}"))
}

/// `FLOOD_WAIT_X` (and the premium variant) arrive as name + numeric value.
fn flood_wait(name: &str, value: Option<u32>) -> Option<Duration> {
    if !name.starts_with("FLOOD_") || !name.ends_with("WAIT") {
        return None;
    }
    Some(Duration::from_secs(u64::from(value.unwrap_or(1).max(1))))
}
