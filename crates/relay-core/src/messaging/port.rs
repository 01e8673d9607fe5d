use async_trait::async_trait;

use crate::{
    domain::{ChatRef, MessageId, MessageRef},
    messaging::types::MediaUpload,
    Result,
};

/// Outbound messaging port (the bot identity).
///
/// Everything the relay posts to Telegram goes through here: replies, status edits,
/// copies of public media and uploads of downloaded payloads.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(&self, chat: &ChatRef, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: &MessageRef, html: &str) -> Result<()>;
    async fn delete_message(&self, msg: &MessageRef) -> Result<()>;

    /// Server-side copy of `message_id` from `from` into `to` (no local download).
    async fn copy_message(
        &self,
        from: &ChatRef,
        message_id: MessageId,
        to: &ChatRef,
    ) -> Result<MessageRef>;

    /// Upload a local payload using the send method matching its kind.
    async fn send_media(&self, chat: &ChatRef, upload: &MediaUpload) -> Result<MessageRef>;
}
