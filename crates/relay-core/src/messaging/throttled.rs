use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatRef, MessageId, MessageRef},
    messaging::{port::MessagingPort, types::MediaUpload},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* Bot API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),     // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces out outbound calls.
///
/// Batch status edits, progress edits and per-item sends all land in the same few chats,
/// so this keeps the relay under Telegram's per-chat limits. It does not guarantee zero
/// 429s; the adapter still retries a `RetryAfter` once.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<ChatRef, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat: &ChatRef) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat: &ChatRef) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_html(&self, chat: &ChatRef, html: &str) -> Result<MessageRef> {
        self.throttle_chat(chat).await;
        self.inner.send_html(chat, html).await
    }

    async fn edit_html(&self, msg: &MessageRef, html: &str) -> Result<()> {
        self.throttle_chat(&msg.chat).await;
        self.inner.edit_html(msg, html).await
    }

    async fn delete_message(&self, msg: &MessageRef) -> Result<()> {
        self.throttle_chat(&msg.chat).await;
        self.inner.delete_message(msg).await
    }

    async fn copy_message(
        &self,
        from: &ChatRef,
        message_id: MessageId,
        to: &ChatRef,
    ) -> Result<MessageRef> {
        self.throttle_chat(to).await;
        self.inner.copy_message(from, message_id, to).await
    }

    async fn send_media(&self, chat: &ChatRef, upload: &MediaUpload) -> Result<MessageRef> {
        self.throttle_chat(chat).await;
        self.inner.send_media(chat, upload).await
    }
}
