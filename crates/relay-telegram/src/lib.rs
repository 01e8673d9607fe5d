//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` MessagingPort over the Telegram Bot API and
//! routes bot updates into the core conversation service.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, ParseMode, Recipient},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use relay_core::{
    domain::{ChatRef, MediaKind, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::MediaUpload},
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn recipient(chat: &ChatRef) -> Recipient {
        match chat {
            ChatRef::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
            ChatRef::Username(name) => Recipient::ChannelUsername(format!("@{name}")),
        }
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        match e {
            teloxide::RequestError::RetryAfter(d) => Error::RateLimited { retry_after: d },
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn upload(&self, chat: &ChatRef, upload: &MediaUpload) -> Result<Message> {
        let to = Self::recipient(chat);
        let file = || InputFile::file(upload.path.clone());
        let caption = upload.caption().map(str::to_string);

        match &upload.kind {
            MediaKind::Video {
                width,
                height,
                duration,
            } => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_video(to.clone(), file())
                        .supports_streaming(true);
                    if let Some(w) = width {
                        req = req.width(*w);
                    }
                    if let Some(h) = height {
                        req = req.height(*h);
                    }
                    if let Some(d) = duration {
                        req = req.duration(*d);
                    }
                    if let Some(c) = &caption {
                        req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await
            }
            MediaKind::VideoNote => {
                self.with_retry(|| self.bot.send_video_note(to.clone(), file()))
                    .await
            }
            MediaKind::Sticker => {
                self.with_retry(|| self.bot.send_sticker(to.clone(), file()))
                    .await
            }
            MediaKind::Voice => {
                self.with_retry(|| {
                    let mut req = self.bot.send_voice(to.clone(), file());
                    if let Some(c) = &caption {
                        req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await
            }
            MediaKind::Audio => {
                self.with_retry(|| {
                    let mut req = self.bot.send_audio(to.clone(), file());
                    if let Some(c) = &caption {
                        req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await
            }
            MediaKind::Photo => {
                self.with_retry(|| {
                    let mut req = self.bot.send_photo(to.clone(), file());
                    if let Some(c) = &caption {
                        req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await
            }
            MediaKind::Document | MediaKind::None => {
                self.with_retry(|| {
                    let mut req = self.bot.send_document(to.clone(), file());
                    if let Some(c) = &caption {
                        req = req.caption(c.clone()).parse_mode(ParseMode::Html);
                    }
                    req
                })
                .await
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat: &ChatRef, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::recipient(chat), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat: chat.clone(),
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: &MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::recipient(&msg.chat),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, msg: &MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::recipient(&msg.chat), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn copy_message(
        &self,
        from: &ChatRef,
        message_id: MessageId,
        to: &ChatRef,
    ) -> Result<MessageRef> {
        let copied = self
            .with_retry(|| {
                self.bot.copy_message(
                    Self::recipient(to),
                    Self::recipient(from),
                    Self::tg_msg_id(message_id),
                )
            })
            .await?;

        Ok(MessageRef {
            chat: to.clone(),
            message_id: MessageId(copied.0),
        })
    }

    async fn send_media(&self, chat: &ChatRef, upload: &MediaUpload) -> Result<MessageRef> {
        let msg = self.upload(chat, upload).await?;
        Ok(MessageRef {
            chat: chat.clone(),
            message_id: MessageId(msg.id.0),
        })
    }
}
