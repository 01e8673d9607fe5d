//! Batch orchestrator: walks `start..start+count`, fetches each message through the
//! identity matching the source's visibility and hands it to the dispatcher.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    dispatch::{ContentDispatcher, DispatchContext},
    domain::{ChatLocator, ChatRef, Item, MessageId, TransferOutcome, TransferRequest, UserId, Visibility},
    errors::Error,
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::SourceClient,
    registry::SessionRegistry,
};

/// Tally of one batch run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub requested: u32,
    pub attempted: u32,
    pub succeeded: u32,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn render(&self) -> String {
        if self.cancelled {
            format!(
                "🛑 Cancelled. {}/{} transferred",
                self.succeeded, self.requested
            )
        } else {
            format!(
                "✅ Completed! {}/{} transferred",
                self.succeeded, self.requested
            )
        }
    }
}

pub struct BatchOrchestrator {
    messenger: Arc<dyn MessagingPort>,
    registry: Arc<SessionRegistry>,
    dispatcher: ContentDispatcher,
    bot_source: Arc<dyn SourceClient>,
}

impl BatchOrchestrator {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        registry: Arc<SessionRegistry>,
        dispatcher: ContentDispatcher,
        bot_source: Arc<dyn SourceClient>,
    ) -> Self {
        Self {
            messenger,
            registry,
            dispatcher,
            bot_source,
        }
    }

    /// Run the batch to completion or cancellation. Progress and the summary go to `reply`.
    pub async fn run(&self, user: UserId, reply: &ChatRef, req: &TransferRequest) -> BatchSummary {
        let task = self.registry.begin_task(user);
        let mut summary = BatchSummary {
            requested: req.count,
            ..BatchSummary::default()
        };
        info!(
            user_id = user.0,
            source = %req.source.chat,
            start = req.start.0,
            count = req.count,
            destination = %req.destination,
            "batch: started"
        );

        let status = match self
            .messenger
            .send_html(reply, &format!("🚀 Transferring {} messages...", req.count))
            .await
        {
            Ok(m) => {
                self.registry.set_task_status(user, m.clone());
                Some(m)
            }
            Err(e) => {
                warn!(user_id = user.0, error = %e, "batch: status message failed");
                None
            }
        };

        for (i, index) in req.indices().enumerate() {
            if task.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.attempted += 1;

            let outcome = match self.fetch(&req.source, index).await {
                Some(item) => {
                    let ctx = DispatchContext {
                        user,
                        reply,
                        source: &req.source,
                        destination: &req.destination,
                        cancel: &task.cancel,
                    };
                    self.dispatcher.dispatch(&ctx, &item).await
                }
                None => TransferOutcome::NotFound,
            };
            if outcome.is_success() {
                summary.succeeded += 1;
            }
            info!(user_id = user.0, index = index.0, outcome = %outcome, "batch: item done");

            if let Some(status) = &status {
                let text = format!(
                    "📨 Message {}/{} ({}): {}",
                    i + 1,
                    req.count,
                    index.0,
                    escape_html(&outcome.to_string())
                );
                if let Err(e) = self.messenger.edit_html(status, &text).await {
                    debug!(error = %e, "batch: status edit failed");
                }
            }

            if task.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
        }

        self.registry.end_task(user, task.id);
        info!(
            user_id = user.0,
            succeeded = summary.succeeded,
            attempted = summary.attempted,
            requested = summary.requested,
            cancelled = summary.cancelled,
            "batch: finished"
        );
        if let Err(e) = self.messenger.send_html(reply, &summary.render()).await {
            warn!(user_id = user.0, error = %e, "batch: summary reply failed");
        }
        summary
    }

    /// Fetch one message. Every failure collapses to `None`; a flood wait is waited out once.
    async fn fetch(&self, source: &ChatLocator, index: MessageId) -> Option<Item> {
        let client = match source.visibility {
            Visibility::Public => self.bot_source.clone(),
            Visibility::Private => match self.registry.user_client() {
                Some(c) => c,
                None => {
                    warn!(index = index.0, "batch: private source without user session");
                    return None;
                }
            },
        };

        let first = client.fetch(&source.chat, index).await;
        let result = match first {
            Err(Error::RateLimited { retry_after }) => {
                info!(index = index.0, wait_secs = retry_after.as_secs(), "batch: flood wait");
                tokio::time::sleep(retry_after).await;
                client.fetch(&source.chat, index).await
            }
            other => other,
        };

        match result {
            Ok(item) => item,
            Err(e) => {
                info!(index = index.0, error = %e, "batch: fetch failed");
                None
            }
        }
    }
}
