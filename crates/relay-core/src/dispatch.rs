//! Per-item transfer: decides between text send, server-side copy and
//! download-then-upload, and folds every failure into a [`TransferOutcome`].

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    domain::{ChatLocator, ChatRef, Item, MediaKind, MessageRef, TransferOutcome, UserId, Visibility},
    errors::Error,
    formatting::escape_html,
    messaging::{port::MessagingPort, types::MediaUpload},
    ports::DownloadOutcome,
    progress::ProgressReporter,
    registry::SessionRegistry,
};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Where an item comes from and goes to, plus the batch's cancellation token.
pub struct DispatchContext<'a> {
    pub user: UserId,
    /// Chat with the operator, where transfer status messages are posted.
    pub reply: &'a ChatRef,
    pub source: &'a ChatLocator,
    pub destination: &'a ChatRef,
    pub cancel: &'a CancellationToken,
}

pub struct ContentDispatcher {
    messenger: Arc<dyn MessagingPort>,
    registry: Arc<SessionRegistry>,
    progress: Arc<ProgressReporter>,
    temp_dir: PathBuf,
}

impl ContentDispatcher {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        registry: Arc<SessionRegistry>,
        progress: Arc<ProgressReporter>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            messenger,
            registry,
            progress,
            temp_dir,
        }
    }

    pub async fn dispatch(&self, ctx: &DispatchContext<'_>, item: &Item) -> TransferOutcome {
        if !item.media.has_media() {
            return self.send_text(ctx, item).await;
        }
        match ctx.source.visibility {
            Visibility::Public => self.copy(ctx, item).await,
            Visibility::Private => self.relay_media(ctx, item).await,
        }
    }

    async fn send_text(&self, ctx: &DispatchContext<'_>, item: &Item) -> TransferOutcome {
        if item.html.trim().is_empty() {
            return TransferOutcome::Failed("message has no text or media".to_string());
        }
        match self.messenger.send_html(ctx.destination, &item.html).await {
            Ok(_) => TransferOutcome::Sent,
            Err(e) => TransferOutcome::Failed(format!("send failed: {e}")),
        }
    }

    async fn copy(&self, ctx: &DispatchContext<'_>, item: &Item) -> TransferOutcome {
        match self
            .messenger
            .copy_message(&ctx.source.chat, item.id, ctx.destination)
            .await
        {
            Ok(_) => TransferOutcome::Copied,
            Err(e) => TransferOutcome::Failed(format!("copy failed: {e}")),
        }
    }

    async fn relay_media(&self, ctx: &DispatchContext<'_>, item: &Item) -> TransferOutcome {
        let Some(client) = self.registry.user_client() else {
            return TransferOutcome::Failed(Error::NotConnected.to_string());
        };

        let status = match self.messenger.send_html(ctx.reply, "⏬ Downloading...").await {
            Ok(m) => m,
            Err(e) => return TransferOutcome::Failed(format!("status message failed: {e}")),
        };

        let payload = TempPayload::new(self.temp_dir.join(payload_file_name(ctx, item)));
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let (downloaded, ()) = tokio::join!(
            client.download(&ctx.source.chat, item, payload.path(), tx, ctx.cancel),
            self.progress.drain(&status, rx),
        );

        match downloaded {
            Ok(DownloadOutcome::Finished) if !ctx.cancel.is_cancelled() => {}
            Ok(_) => {
                self.edit(&status, "❌ Cancelled").await;
                return TransferOutcome::Cancelled;
            }
            Err(e) => {
                self.edit(
                    &status,
                    &format!("❌ Download failed: {}", escape_html(&e.to_string())),
                )
                .await;
                return TransferOutcome::Failed(format!("download failed: {e}"));
            }
        }

        self.edit(&status, "⏫ Uploading...").await;
        let upload = MediaUpload {
            kind: item.media.clone(),
            path: payload.path().to_path_buf(),
            caption_html: Some(item.html.clone()),
        };
        let sent = self.messenger.send_media(ctx.destination, &upload).await;
        drop(payload);

        match sent {
            Ok(_) => {
                if let Err(e) = self.messenger.delete_message(&status).await {
                    debug!(error = %e, "status cleanup failed");
                }
                TransferOutcome::Completed
            }
            Err(e) => {
                self.edit(
                    &status,
                    &format!("❌ Upload failed: {}", escape_html(&e.to_string())),
                )
                .await;
                TransferOutcome::Failed(format!("upload failed: {e}"))
            }
        }
    }

    async fn edit(&self, status: &MessageRef, html: &str) {
        if let Err(e) = self.messenger.edit_html(status, html).await {
            debug!(error = %e, "status edit failed");
        }
    }
}

/// Local payload removed when dropped, whatever path the transfer took.
struct TempPayload {
    path: PathBuf,
}

impl TempPayload {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPayload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove temp payload");
            }
        }
    }
}

fn payload_file_name(ctx: &DispatchContext<'_>, item: &Item) -> String {
    let chat = match &ctx.source.chat {
        ChatRef::Id(id) => id.unsigned_abs().to_string(),
        ChatRef::Username(name) => sanitize_filename(name),
    };
    let name = item
        .file_name
        .as_deref()
        .map(sanitize_filename)
        .unwrap_or_else(|| format!("media{}", default_extension(&item.media)));
    format!("{}_{chat}_{}_{name}", ctx.user.0, item.id.0)
}

fn default_extension(kind: &MediaKind) -> &'static str {
    match kind {
        MediaKind::Video { .. } | MediaKind::VideoNote => ".mp4",
        MediaKind::Voice => ".ogg",
        MediaKind::Sticker => ".webp",
        MediaKind::Audio => ".mp3",
        MediaKind::Photo => ".jpg",
        MediaKind::Document | MediaKind::None => "",
    }
}

fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "media".to_string()
    } else {
        out
    }
}
