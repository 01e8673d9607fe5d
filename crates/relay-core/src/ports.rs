//! Ports towards the MTProto side of the platform (reading sources, logging in).
//!
//! Implemented by `relay-mtproto`; the core only sees these traits.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatRef, Item, MessageId},
    progress::ProgressSample,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Finished,
    Cancelled,
}

/// Read access to source chats through one identity (bot or user).
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one message. `Ok(None)` when the message does not exist or is empty.
    ///
    /// A flood wait surfaces as [`crate::Error::RateLimited`].
    async fn fetch(&self, chat: &ChatRef, id: MessageId) -> Result<Option<Item>>;

    /// Stream the media of `item` into `dest`.
    ///
    /// Sends a [`ProgressSample`] after each chunk and checks `cancel` between chunks;
    /// a cancelled download returns [`DownloadOutcome::Cancelled`] and may leave a
    /// partial file behind for the caller to remove.
    async fn download(
        &self,
        chat: &ChatRef,
        item: &Item,
        dest: &Path,
        progress: mpsc::Sender<ProgressSample>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome>;
}

/// Result of submitting a login code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeOutcome {
    SignedIn,
    PasswordRequired,
}

/// Short-lived authentication context used only while the login dialogue runs.
///
/// The handle keeps the verification token returned by `request_code` internally.
/// `teardown` consumes it, so it can only ever be closed once.
#[async_trait]
pub trait AuthHandle: Send + Sync {
    async fn request_code(&mut self, phone: &str) -> Result<()>;
    async fn submit_code(&mut self, code: &str) -> Result<CodeOutcome>;
    async fn submit_password(&mut self, password: &str) -> Result<()>;
    /// Durable credential (session string) for the signed-in identity.
    async fn export_credential(&self) -> Result<String>;
    async fn teardown(self: Box<Self>);
}

#[async_trait]
pub trait AuthPort: Send + Sync {
    async fn create_handle(&self) -> Result<Box<dyn AuthHandle>>;
}

/// Builds a user-identity [`SourceClient`] from a durable credential.
#[async_trait]
pub trait UserClientConnector: Send + Sync {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn SourceClient>>;
}
